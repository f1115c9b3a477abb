use std::time::Duration;

use thiserror::Error;

use crate::queue::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Malformed or out-of-bound input. Rejected before enqueue and never retried.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("text cannot be empty")]
    EmptyText,

    #[error("text too short (minimum {min} characters)")]
    TooShort { min: usize },

    #[error("text too long (maximum {max} characters, got {len})")]
    TooLong { max: usize, len: usize },

    #[error(
        "text would generate audio longer than {max_secs}s (estimated {estimated_secs:.1}s)"
    )]
    AudioTooLong { max_secs: u32, estimated_secs: f64 },

    #[error("priority {0} is outside 0..=10")]
    Priority(u8),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown audio format: {0}")]
    UnknownFormat(String),

    #[error("invalid job payload: {0}")]
    Payload(String),
}

/// Connection-level failure of a single provider attempt. Always retryable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("no frame received within {0:?}")]
    IdleTimeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("connection closed before a terminal frame")]
    Closed,

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome of one failed provider attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend answered and refused the request. Retrying the same
    /// provider is pointless, so this short-circuits straight to failover.
    #[error("{provider} rejected the request: {message}")]
    Rejected { provider: String, message: String },
}

impl AttemptError {
    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Transport(_))
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(
        "all providers failed (primary: {}, secondary: {secondary})",
        .primary.as_deref().unwrap_or("not attempted")
    )]
    ProvidersExhausted {
        primary: Option<String>,
        secondary: String,
    },
}

/// Why a worker could not finish a job.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl JobFailure {
    /// Whether the queue should spend a retry on this job.
    ///
    /// Bad input never improves on retry. Exhausted providers are retried
    /// only when `retry_after_failover` is set.
    pub fn is_retryable(&self, retry_after_failover: bool) -> bool {
        match self {
            JobFailure::Validation(_) | JobFailure::Synthesis(SynthesisError::Validation(_)) => {
                false
            }
            JobFailure::Synthesis(SynthesisError::ProvidersExhausted { .. }) => {
                retry_after_failover
            }
            JobFailure::Upload(_) => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} cannot be cancelled while {status}")]
    NotCancellable { id: JobId, status: JobStatus },

    #[error("Job {id} is {status}, expected processing")]
    NotProcessing { id: JobId, status: JobStatus },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid remote key: {0}")]
    InvalidKey(String),
}
