//! Deterministic in-process provider for tests and mock mode.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::info;

use super::{Artifact, SpeechProvider, SynthesisRequest, wav};
use crate::error::{AttemptError, TransportError};

/// What one scripted call returns.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    /// Succeed with this raw PCM.
    Audio(Vec<u8>),
    /// Fail with a retryable idle timeout.
    Timeout,
    /// Fail with an explicit backend rejection.
    Reject(String),
}

/// Plays back a script of outcomes, then repeats `fallback` forever.
pub struct FakeProvider {
    name: String,
    sample_rate: u32,
    script: Mutex<VecDeque<FakeOutcome>>,
    fallback: FakeOutcome,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(name: &str, script: Vec<FakeOutcome>, fallback: FakeOutcome) -> Self {
        Self {
            name: name.to_string(),
            sample_rate: 24_000,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns one second of silence.
    pub fn silent(name: &str) -> Self {
        Self::new(name, Vec::new(), FakeOutcome::Audio(wav::silence(24_000, 1)))
    }

    /// Always fails with `outcome`.
    pub fn failing(name: &str, outcome: FakeOutcome) -> Self {
        Self::new(name, Vec::new(), outcome)
    }

    /// Runs `script` first, then succeeds with one second of silence.
    pub fn scripted(name: &str, script: Vec<FakeOutcome>) -> Self {
        Self::new(name, script, FakeOutcome::Audio(wav::silence(24_000, 1)))
    }

    /// How many times `synthesize` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> FakeOutcome {
        let mut script = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

impl SpeechProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Artifact, AttemptError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.next_outcome();
        info!(provider = %self.name, call, chars = request.text.chars().count(), "fake synthesis");

        match outcome {
            FakeOutcome::Audio(pcm) => Ok(Artifact::from_pcm(&pcm, request.format, self.sample_rate)),
            FakeOutcome::Timeout => Err(TransportError::IdleTimeout(Duration::from_secs(30)).into()),
            FakeOutcome::Reject(message) => Err(AttemptError::rejected(&self.name, message)),
        }
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name, "status": "mock", "calls": self.calls() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_script_then_fallback() {
        let provider = FakeProvider::scripted(
            "primary",
            vec![FakeOutcome::Timeout, FakeOutcome::Reject("nope".into())],
        );
        let request = SynthesisRequest::new("Hello");

        assert!(provider.synthesize(&request).await.unwrap_err().is_retryable());
        assert!(!provider.synthesize(&request).await.unwrap_err().is_retryable());
        let artifact = provider.synthesize(&request).await.unwrap();
        assert!((artifact.duration_secs() - 1.0).abs() < f64::EPSILON);
        assert_eq!(provider.calls(), 3);
    }
}
