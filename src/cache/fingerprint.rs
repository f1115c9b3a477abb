use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::provider::AudioFormat;

/// Hex-encoded SHA-256 over the canonical form of a synthesis request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `s` looks like a fingerprint (64 lowercase hex chars).
    pub fn is_valid(s: &str) -> bool {
        s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    pub(crate) fn from_stored(s: String) -> Option<Self> {
        Self::is_valid(&s).then_some(Self(s))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four fields that identify a cacheable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey<'a> {
    pub text: &'a str,
    pub provider: &'a str,
    pub voice_id: Option<&'a str>,
    pub format: AudioFormat,
}

impl<'a> CacheKey<'a> {
    pub fn new(
        text: &'a str,
        provider: &'a str,
        voice_id: Option<&'a str>,
        format: AudioFormat,
    ) -> Self {
        Self {
            text,
            provider,
            voice_id,
            format,
        }
    }

    /// Text is trimmed and lowercased so trivially different scripts share audio.
    pub fn normalized_text(&self) -> String {
        self.text.trim().to_lowercase()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        // serde_json maps are key-sorted, which makes this canonical.
        let canonical = serde_json::json!({
            "text": self.normalized_text(),
            "provider": self.provider,
            "voice_id": self.voice_id.unwrap_or("default"),
            "format": self.format.extension(),
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        Fingerprint(hex::encode(digest))
    }
}
