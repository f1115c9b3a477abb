//! Input limits applied before a job is accepted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;

/// Bounds on synthesis input, checked before enqueue and again before synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_input_chars: usize,
    pub min_input_chars: usize,
    pub max_audio_duration_secs: u32,
    /// Speaking-rate estimate used to predict audio length.
    pub chars_per_second: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_chars: 3000,
            min_input_chars: 1,
            max_audio_duration_secs: 90,
            chars_per_second: 15,
        }
    }
}

impl Limits {
    /// Rough output duration for `text`, in seconds.
    pub fn estimated_duration_secs(&self, text: &str) -> f64 {
        text.chars().count() as f64 / f64::from(self.chars_per_second.max(1))
    }

    pub fn validate(&self, text: &str) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }

        let len = text.chars().count();
        if len < self.min_input_chars {
            return Err(ValidationError::TooShort {
                min: self.min_input_chars,
            });
        }
        if len > self.max_input_chars {
            return Err(ValidationError::TooLong {
                max: self.max_input_chars,
                len,
            });
        }

        let estimated_secs = self.estimated_duration_secs(text);
        if estimated_secs > f64::from(self.max_audio_duration_secs) {
            return Err(ValidationError::AudioTooLong {
                max_secs: self.max_audio_duration_secs,
                estimated_secs,
            });
        }

        debug!(chars = len, estimated_secs, "input validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_normal_text() {
        assert!(Limits::default().validate("Hello world").is_ok());
    }

    #[test]
    fn rejects_blank_text() {
        assert!(matches!(
            Limits::default().validate("   \n"),
            Err(ValidationError::EmptyText)
        ));
    }

    #[test]
    fn rejects_short_and_long_text() {
        let limits = Limits {
            min_input_chars: 5,
            max_input_chars: 10,
            ..Default::default()
        };
        assert!(matches!(
            limits.validate("hey"),
            Err(ValidationError::TooShort { min: 5 })
        ));
        assert!(matches!(
            limits.validate("this is far too long"),
            Err(ValidationError::TooLong { max: 10, len: 20 })
        ));
    }

    #[test]
    fn rejects_text_that_would_run_too_long() {
        let limits = Limits {
            max_audio_duration_secs: 2,
            chars_per_second: 10,
            ..Default::default()
        };
        let err = limits.validate(&"a".repeat(25)).unwrap_err();
        assert!(matches!(err, ValidationError::AudioTooLong { max_secs: 2, .. }));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let limits = Limits {
            max_input_chars: 3,
            ..Default::default()
        };
        assert!(limits.validate("äöü").is_ok());
    }
}
