//! Wire types exchanged with the speech backends.
//!
//! All structs derive `Serialize`/`Deserialize` so they map directly onto the
//! JSON frames of the streaming protocol and the HTTP request body.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::VoiceParams;

/// The single request frame opening a streaming exchange.
///
/// Optional voice settings are only sent when they differ from the backend's
/// defaults, keeping the frame minimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Always `"synthesize"`.
    pub action: String,
    pub text: String,
    pub voice: String,
    pub sample_rate: u32,
    /// Encoding of the binary chunks; the client wraps them afterwards.
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f32>,
}

impl RequestFrame {
    pub fn synthesize(text: &str, voice: &str, sample_rate: u32, params: &VoiceParams) -> Self {
        let non_default = |v: f32| ((v - 1.0).abs() > f32::EPSILON).then_some(v);
        Self {
            action: "synthesize".into(),
            text: text.to_string(),
            voice: voice.to_string(),
            sample_rate,
            format: "pcm".into(),
            style: params.style.clone(),
            seed: params.seed,
            profile: params.profile.clone(),
            speed: non_default(params.speed),
            pitch: non_default(params.pitch),
            energy: non_default(params.energy),
        }
    }
}

/// A JSON text frame sent by the streaming backend.
///
/// A string `status` of `"completed"` or `"error"` marks a terminal frame.
/// Any other valid JSON, whatever its shape, is a progress update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlFrame {
    pub status: Option<String>,
    pub message: Option<Value>,
}

/// How a control frame affects the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Completed,
    Error(String),
    Progress,
}

impl ControlFrame {
    /// Fails only when `text` is not JSON at all.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self {
            status: value
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            message: value.get("message").filter(|m| !m.is_null()).cloned(),
        })
    }

    pub fn classify(&self) -> Control {
        match self.status.as_deref() {
            Some("completed") => Control::Completed,
            Some("error") => Control::Error(match &self.message {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => "Unknown error".to_string(),
            }),
            _ => Control::Progress,
        }
    }
}

/// Body of the secondary provider's text-to-speech call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToSpeechBody {
    pub text: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_omits_default_voice_settings() {
        let frame = RequestFrame::synthesize("Hello", "nova", 24_000, &VoiceParams::default());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["action"], "synthesize");
        assert_eq!(json["voice"], "nova");
        assert_eq!(json["sample_rate"], 24_000);
        assert_eq!(json["format"], "pcm");
        assert!(json.get("speed").is_none());
        assert!(json.get("style").is_none());
    }

    #[test]
    fn request_frame_carries_custom_voice_settings() {
        let params = VoiceParams {
            style: Some("cheerful".into()),
            seed: Some(42),
            speed: 1.2,
            ..Default::default()
        };
        let frame = RequestFrame::synthesize("Hi", "nova", 16_000, &params);
        assert_eq!(frame.style.as_deref(), Some("cheerful"));
        assert_eq!(frame.seed, Some(42));
        assert_eq!(frame.speed, Some(1.2));
        assert_eq!(frame.pitch, None);
    }

    fn classify(text: &str) -> Control {
        ControlFrame::parse(text).unwrap().classify()
    }

    #[test]
    fn control_frames_classify() {
        assert_eq!(classify(r#"{"status":"completed"}"#), Control::Completed);
        assert_eq!(
            classify(r#"{"status":"error","message":"voice missing"}"#),
            Control::Error("voice missing".into())
        );
        assert_eq!(
            classify(r#"{"status":"error"}"#),
            Control::Error("Unknown error".into())
        );
        assert_eq!(
            classify(r#"{"status":"generating","progress":0.4}"#),
            Control::Progress
        );
    }

    #[test]
    fn structured_frames_are_progress() {
        assert_eq!(
            classify(r#"{"status":"generating","message":{"percent":50}}"#),
            Control::Progress
        );
        assert_eq!(classify(r#"{"status":7}"#), Control::Progress);
        assert_eq!(classify(r#"[1, 2, 3]"#), Control::Progress);
        assert_eq!(classify("42"), Control::Progress);
        assert_eq!(
            classify(r#"{"status":"error","message":{"code":503}}"#),
            Control::Error(r#"{"code":503}"#.into())
        );
        assert!(ControlFrame::parse("not json").is_err());
    }
}
