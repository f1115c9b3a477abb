//! Typed views over the opaque job payload and result maps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::orchestrator::Synthesized;
use crate::provider::{AudioFormat, ProviderKind, SynthesisRequest, VoiceParams};
use crate::queue::JobData;

/// Job type tag for speech synthesis jobs.
pub const SPEECH_JOB: &str = "tts";

/// What a speech job asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechJob {
    pub text: String,
    #[serde(default)]
    pub format: AudioFormat,
    /// Forces a provider for this job only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(flatten)]
    pub voice: VoiceParams,
}

impl SpeechJob {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: AudioFormat::default(),
            provider: None,
            voice: VoiceParams::default(),
        }
    }

    pub fn from_data(data: &JobData) -> Result<Self, ValidationError> {
        serde_json::from_value(Value::Object(data.clone()))
            .map_err(|err| ValidationError::Payload(err.to_string()))
    }

    pub fn to_data(&self) -> Result<JobData, ValidationError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ValidationError::Payload(format!("expected an object, got {other}"))),
            Err(err) => Err(ValidationError::Payload(err.to_string())),
        }
    }

    pub fn request(&self) -> SynthesisRequest {
        SynthesisRequest {
            text: self.text.clone(),
            voice: self.voice.clone(),
            format: self.format,
        }
    }
}

/// One entry of a batch file: a [`SpeechJob`] plus its queue priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(flatten)]
    pub job: SpeechJob,
}

fn default_priority() -> u8 {
    5
}

/// What a completed speech job records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub audio_url: Option<String>,
    pub fingerprint: String,
    pub provider_used: ProviderKind,
    pub fallback_triggered: bool,
    pub cache_hit: bool,
    pub attempts: u32,
    pub retry_count: u32,
    pub elapsed_ms: u64,
    pub format: AudioFormat,
    pub size_bytes: usize,
    pub duration_secs: f64,
}

impl JobResult {
    pub fn new(synthesized: &Synthesized, audio_url: Option<String>) -> Self {
        let telemetry = &synthesized.telemetry;
        let artifact = &synthesized.artifact;
        Self {
            audio_url,
            fingerprint: telemetry.fingerprint.to_string(),
            provider_used: telemetry.provider_used,
            fallback_triggered: telemetry.fallback_triggered,
            cache_hit: telemetry.cache_hit,
            attempts: telemetry.attempts,
            retry_count: telemetry.retry_count,
            elapsed_ms: telemetry.elapsed_ms,
            format: artifact.format,
            size_bytes: artifact.len(),
            duration_secs: artifact.duration_secs(),
        }
    }

    pub fn into_data(self) -> JobData {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => JobData::new(),
        }
    }

    pub fn from_data(data: &JobData) -> Option<Self> {
        serde_json::from_value(Value::Object(data.clone())).ok()
    }
}
