use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::Fingerprint;
use crate::provider::{Artifact, AudioFormat};

/// Sidecar metadata persisted next to every on-disk blob as `<fingerprint>.meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub provider: String,
    pub voice_id: String,
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub hit_count: u64,
}

/// Where an entry's bytes live.
#[derive(Debug, Clone)]
pub(super) enum Blob {
    Memory(Arc<[u8]>),
    File(PathBuf),
}

/// One indexed entry. Access bookkeeping is atomic so hits only need the
/// index read lock.
#[derive(Debug)]
pub(super) struct Entry {
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub provider: String,
    pub voice_id: String,
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
    pub blob: Blob,
    hit_count: AtomicU64,
    last_accessed_ms: AtomicI64,
    /// Logical access clock; larger means more recently used.
    recency: AtomicU64,
}

impl Entry {
    pub fn new(
        fingerprint: Fingerprint,
        artifact: &Artifact,
        provider: &str,
        voice_id: &str,
        blob: Blob,
        recency: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            fingerprint,
            size_bytes: artifact.len() as u64,
            format: artifact.format,
            sample_rate: artifact.sample_rate,
            provider: provider.to_string(),
            voice_id: voice_id.to_string(),
            duration_secs: artifact.duration_secs(),
            created_at: now,
            blob,
            hit_count: AtomicU64::new(0),
            last_accessed_ms: AtomicI64::new(now.timestamp_millis()),
            recency: AtomicU64::new(recency),
        }
    }

    pub fn from_meta(meta: EntryMeta, blob: Blob, recency: u64) -> Self {
        Self {
            fingerprint: meta.fingerprint,
            size_bytes: meta.size_bytes,
            format: meta.format,
            sample_rate: meta.sample_rate,
            provider: meta.provider,
            voice_id: meta.voice_id,
            duration_secs: meta.duration_secs,
            created_at: meta.created_at,
            blob,
            hit_count: AtomicU64::new(meta.hit_count),
            last_accessed_ms: AtomicI64::new(meta.last_accessed.timestamp_millis()),
            recency: AtomicU64::new(recency),
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            // A TTL too large for chrono never expires.
            Err(_) => false,
        }
    }

    pub fn touch(&self, recency: u64) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.recency.fetch_max(recency, Ordering::Relaxed);
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn recency(&self) -> u64 {
        self.recency.load(Ordering::Relaxed)
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        let ms = self.last_accessed_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(self.created_at)
    }

    pub fn to_artifact(&self, data: Arc<[u8]>) -> Artifact {
        Artifact {
            data,
            format: self.format,
            sample_rate: self.sample_rate,
        }
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            fingerprint: self.fingerprint.clone(),
            size_bytes: self.size_bytes,
            format: self.format,
            sample_rate: self.sample_rate,
            provider: self.provider.clone(),
            voice_id: self.voice_id.clone(),
            duration_secs: self.duration_secs,
            created_at: self.created_at,
            last_accessed: self.last_accessed(),
            hit_count: self.hit_count(),
        }
    }
}
