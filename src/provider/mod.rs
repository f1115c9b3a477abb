//! Speech providers behind a single capability trait.
//!
//! The primary is a streaming WebSocket backend ([`StreamingProvider`]), the
//! secondary a one-shot HTTP backend ([`HttpProvider`]). [`FakeProvider`] is
//! the deterministic stand-in used by tests and mock mode. Which ones are
//! wired in is decided when the orchestrator is constructed.

pub mod fake;
pub mod http;
pub mod streaming;
pub mod types;
pub mod wav;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AttemptError, ValidationError};

pub use fake::{FakeOutcome, FakeProvider};
pub use http::{HttpProvider, HttpProviderConfig};
pub use streaming::{StreamingConfig, StreamingProvider};

/// Which of the two configured backends to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Primary,
    Secondary,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Primary => "primary",
            ProviderKind::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(ProviderKind::Primary),
            "secondary" => Ok(ProviderKind::Secondary),
            other => Err(ValidationError::UnknownProvider(other.to_string())),
        }
    }
}

/// Container format of a finished artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    /// Raw little-endian 16-bit mono PCM, no header.
    Pcm,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm => "pcm",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "pcm" => Ok(AudioFormat::Pcm),
            other => Err(ValidationError::UnknownFormat(other.to_string())),
        }
    }
}

/// Per-request voice settings. Only `voice_id` participates in the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    pub voice_id: Option<String>,
    pub style: Option<String>,
    pub seed: Option<u64>,
    pub profile: Option<String>,
    pub speed: f32,
    pub pitch: f32,
    pub energy: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: None,
            style: None,
            seed: None,
            profile: None,
            speed: 1.0,
            pitch: 1.0,
            energy: 1.0,
        }
    }
}

impl VoiceParams {
    pub fn with_voice(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: Some(voice_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: VoiceParams,
    pub format: AudioFormat,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: VoiceParams::default(),
            format: AudioFormat::default(),
        }
    }
}

/// A finished piece of audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub data: Arc<[u8]>,
    pub format: AudioFormat,
    pub sample_rate: u32,
}

impl Artifact {
    /// Wrap raw mono 16-bit PCM into `format`.
    pub fn from_pcm(pcm: &[u8], format: AudioFormat, sample_rate: u32) -> Self {
        let data: Arc<[u8]> = match format {
            AudioFormat::Wav => wav::wrap_pcm(pcm, sample_rate).into(),
            AudioFormat::Pcm => Arc::from(pcm),
        };
        Self {
            data,
            format,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback length derived from the PCM payload size.
    pub fn duration_secs(&self) -> f64 {
        let header = match self.format {
            AudioFormat::Wav => wav::HEADER_LEN,
            AudioFormat::Pcm => 0,
        };
        let pcm_bytes = self.data.len().saturating_sub(header);
        let bytes_per_sec = self.sample_rate as usize * wav::BYTES_PER_FRAME;
        if bytes_per_sec == 0 {
            return 0.0;
        }
        pcm_bytes as f64 / bytes_per_sec as f64
    }
}

/// A backend able to turn one request into audio in a single attempt.
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> impl Future<Output = Result<Artifact, AttemptError>> + Send;

    /// Configuration summary for health reporting.
    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name() })
    }
}

impl<T: SpeechProvider> SpeechProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> impl Future<Output = Result<Artifact, AttemptError>> + Send {
        (**self).synthesize(request)
    }

    fn describe(&self) -> serde_json::Value {
        (**self).describe()
    }
}
