//! Content-addressed store for finished audio.
//!
//! Entries are keyed by a [`Fingerprint`] of the normalized request, expire
//! lazily once older than the TTL, and are evicted least-recently-used first
//! whenever a write pushes the total past the ceiling. The index sits behind
//! one `RwLock`: hits take the read lock and bump atomic counters, while
//! writes, evictions and expiry take the write lock. Blob and sidecar file
//! I/O always happens outside that lock, under a separate async mutex that
//! orders every file write against every file delete.

mod entry;
mod fingerprint;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use entry::EntryMeta;
use entry::{Blob, Entry};
pub use fingerprint::{CacheKey, Fingerprint};

use crate::error::CacheError;
use crate::provider::{Artifact, AudioFormat};

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Blob directory. `None` keeps everything in memory.
    pub dir: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_size_bytes: 500 * 1024 * 1024,
            ttl: Duration::from_secs(168 * 3600),
        }
    }
}

impl CacheConfig {
    /// Eviction drives the total back down to 80% of the ceiling.
    pub fn target_bytes(&self) -> u64 {
        self.max_size_bytes.saturating_mul(4) / 5
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub fingerprint: Fingerprint,
    pub provider: String,
    pub voice_id: String,
    pub size_bytes: u64,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub location: String,
    pub entries: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub usage_percent: f64,
    pub ttl_hours: f64,
    pub total_hits: u64,
    /// Sorted by hit count, most used first.
    pub per_entry: Vec<EntryStats>,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<Fingerprint, Arc<Entry>>,
    total_bytes: u64,
}

impl Index {
    fn insert(&mut self, entry: Arc<Entry>) -> Option<Arc<Entry>> {
        self.total_bytes += entry.size_bytes;
        let replaced = self.entries.insert(entry.fingerprint.clone(), entry);
        if let Some(old) = &replaced {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        replaced
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<Arc<Entry>> {
        let removed = self.entries.remove(fingerprint)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }

    fn is_current(&self, entry: &Arc<Entry>) -> bool {
        self.entries
            .get(&entry.fingerprint)
            .is_some_and(|indexed| Arc::ptr_eq(indexed, entry))
    }

    /// Removes `entry` only if it is still the indexed instance for its key.
    fn remove_if_current(&mut self, entry: &Arc<Entry>) -> bool {
        self.is_current(entry) && self.remove(&entry.fingerprint).is_some()
    }

    fn evict_down_to(&mut self, target: u64) -> Vec<Arc<Entry>> {
        if self.total_bytes <= target {
            return Vec::new();
        }
        let mut order: Vec<(u64, Fingerprint)> = self
            .entries
            .values()
            .map(|entry| (entry.recency(), entry.fingerprint.clone()))
            .collect();
        order.sort_unstable();

        let mut victims = Vec::new();
        for (_, fingerprint) in order {
            if self.total_bytes <= target {
                break;
            }
            if let Some(entry) = self.remove(&fingerprint) {
                victims.push(entry);
            }
        }
        victims
    }
}

pub struct ResultCache {
    config: CacheConfig,
    index: RwLock<Index>,
    clock: AtomicU64,
    // Held while blob or sidecar files are written or deleted.
    io: Mutex<()>,
}

impl ResultCache {
    /// An in-memory cache, ignoring any configured directory.
    pub fn memory(config: CacheConfig) -> Self {
        Self {
            config: CacheConfig { dir: None, ..config },
            index: RwLock::new(Index::default()),
            clock: AtomicU64::new(0),
            io: Mutex::new(()),
        }
    }

    /// Opens the cache, loading surviving entries from `config.dir` if set.
    pub async fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let dir = match config.dir.clone() {
            Some(dir) if config.enabled => dir,
            _ => return Ok(Self::memory(config)),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let cache = Self {
            config,
            index: RwLock::new(Index::default()),
            clock: AtomicU64::new(0),
            io: Mutex::new(()),
        };

        let mut metas = load_sidecars(&dir).await?;
        metas.sort_by_key(|meta| meta.last_accessed);
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let mut index = cache.write_index();
            for meta in metas {
                let blob = Blob::File(blob_path(&dir, &meta.fingerprint, meta.format));
                let entry = Arc::new(Entry::from_meta(meta, blob, cache.tick()));
                if entry.is_expired(cache.config.ttl, now) {
                    expired.push(entry);
                } else {
                    index.insert(entry);
                }
            }
        }
        for entry in &expired {
            cache.delete_files(entry).await;
        }

        let evicted = cache.evict_to_target_if_over().await;
        info!(
            dir = %dir.display(),
            entries = cache.len(),
            expired = expired.len(),
            evicted,
            "cache loaded"
        );
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the cached artifact for `key`, or `None` on a miss.
    ///
    /// Expired entries are removed and reported as misses. Storage errors are
    /// logged and also count as misses.
    pub async fn get(&self, key: &CacheKey<'_>) -> Option<Artifact> {
        if !self.config.enabled {
            return None;
        }
        let fingerprint = key.fingerprint();
        let indexed = self.read_index().entries.get(&fingerprint).cloned();
        let Some(entry) = indexed else {
            debug!(%fingerprint, "cache miss");
            return None;
        };

        if entry.is_expired(self.config.ttl, Utc::now()) {
            info!(%fingerprint, "cache entry expired");
            self.discard(&entry).await;
            return None;
        }

        let data: Arc<[u8]> = match &entry.blob {
            Blob::Memory(data) => data.clone(),
            Blob::File(path) => match tokio::fs::read(path).await {
                Ok(bytes) => bytes.into(),
                Err(err) => {
                    warn!(%fingerprint, error = %err, "cache read failed, treating as miss");
                    self.discard(&entry).await;
                    return None;
                }
            },
        };

        entry.touch(self.tick());
        if let Some(dir) = &self.config.dir {
            let _io = self.io.lock().await;
            let current = self.read_index().is_current(&entry);
            if current {
                if let Err(err) = write_sidecar(dir, &entry.meta()).await {
                    warn!(%fingerprint, error = %err, "failed to refresh cache metadata");
                }
            }
        }
        info!(%fingerprint, hits = entry.hit_count(), "cache hit");
        Some(entry.to_artifact(data))
    }

    /// Whether a live entry exists for `key`. Does not count as an access.
    pub fn contains(&self, key: &CacheKey<'_>) -> bool {
        let fingerprint = key.fingerprint();
        self.read_index()
            .entries
            .get(&fingerprint)
            .is_some_and(|entry| !entry.is_expired(self.config.ttl, Utc::now()))
    }

    /// Stores `artifact` under `key`, then evicts if the ceiling is exceeded.
    pub async fn put(&self, key: &CacheKey<'_>, artifact: &Artifact) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let fingerprint = key.fingerprint();
        let _io = self.io.lock().await;
        let blob = match &self.config.dir {
            None => Blob::Memory(artifact.data.clone()),
            Some(dir) => {
                let path = blob_path(dir, &fingerprint, artifact.format);
                tokio::fs::write(&path, &artifact.data).await?;
                Blob::File(path)
            }
        };
        let entry = Arc::new(Entry::new(
            fingerprint.clone(),
            artifact,
            key.provider,
            key.voice_id.unwrap_or("default"),
            blob,
            self.tick(),
        ));
        if let Some(dir) = &self.config.dir {
            write_sidecar(dir, &entry.meta()).await?;
        }

        let (total, victims) = {
            let mut index = self.write_index();
            // A replaced entry shares its file paths with the new one.
            index.insert(entry);
            let victims = if index.total_bytes > self.config.max_size_bytes {
                index.evict_down_to(self.config.target_bytes())
            } else {
                Vec::new()
            };
            (index.total_bytes, victims)
        };
        info!(
            %fingerprint,
            size_bytes = artifact.len(),
            total_bytes = total,
            "cached artifact"
        );
        self.delete_evicted(&victims).await;
        Ok(())
    }

    /// Evicts least-recently-used entries until the total is at or below 80%
    /// of the ceiling. Returns how many entries were removed.
    pub async fn evict_to_target(&self) -> usize {
        let _io = self.io.lock().await;
        let victims = self.write_index().evict_down_to(self.config.target_bytes());
        self.delete_evicted(&victims).await;
        victims.len()
    }

    async fn evict_to_target_if_over(&self) -> usize {
        if self.total_bytes() > self.config.max_size_bytes {
            self.evict_to_target().await
        } else {
            0
        }
    }

    /// Deletes every entry and returns how many there were.
    pub async fn clear(&self) -> usize {
        let _io = self.io.lock().await;
        let entries: Vec<Arc<Entry>> = {
            let mut index = self.write_index();
            index.total_bytes = 0;
            index.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            self.delete_files(entry).await;
        }
        info!(cleared = entries.len(), "cache cleared");
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.read_index().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.read_index().total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.read_index();
        let mut per_entry: Vec<EntryStats> = index
            .entries
            .values()
            .map(|entry| EntryStats {
                fingerprint: entry.fingerprint.clone(),
                provider: entry.provider.clone(),
                voice_id: entry.voice_id.clone(),
                size_bytes: entry.size_bytes,
                hit_count: entry.hit_count(),
                created_at: entry.created_at,
                last_accessed: entry.last_accessed(),
            })
            .collect();
        per_entry.sort_by(|a, b| {
            b.hit_count
                .cmp(&a.hit_count)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        let usage_percent = if self.config.max_size_bytes == 0 {
            0.0
        } else {
            index.total_bytes as f64 / self.config.max_size_bytes as f64 * 100.0
        };
        CacheStats {
            enabled: self.config.enabled,
            location: match &self.config.dir {
                Some(dir) => dir.display().to_string(),
                None => "memory".to_string(),
            },
            entries: index.entries.len(),
            total_size_bytes: index.total_bytes,
            max_size_bytes: self.config.max_size_bytes,
            usage_percent,
            ttl_hours: self.config.ttl.as_secs_f64() / 3600.0,
            total_hits: per_entry.iter().map(|entry| entry.hit_count).sum(),
            per_entry,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn discard(&self, entry: &Arc<Entry>) {
        let _io = self.io.lock().await;
        let removed = self.write_index().remove_if_current(entry);
        if removed {
            self.delete_files(entry).await;
        }
    }

    async fn delete_evicted(&self, victims: &[Arc<Entry>]) {
        for victim in victims {
            info!(
                fingerprint = %victim.fingerprint,
                size_bytes = victim.size_bytes,
                "evicted cache entry"
            );
            self.delete_files(victim).await;
        }
    }

    async fn delete_files(&self, entry: &Entry) {
        let Blob::File(path) = &entry.blob else {
            return;
        };
        let Some(dir) = path.parent() else {
            return;
        };
        for file in [path.clone(), sidecar_path(dir, &entry.fingerprint)] {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %file.display(), error = %err, "failed to delete cache file"),
            }
        }
    }
}

fn blob_path(dir: &Path, fingerprint: &Fingerprint, format: AudioFormat) -> PathBuf {
    dir.join(format!("{fingerprint}.{}", format.extension()))
}

fn sidecar_path(dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
    dir.join(format!("{fingerprint}{META_SUFFIX}"))
}

async fn write_sidecar(dir: &Path, meta: &EntryMeta) -> Result<(), CacheError> {
    let json = serde_json::to_vec_pretty(meta)?;
    tokio::fs::write(sidecar_path(dir, &meta.fingerprint), json).await?;
    Ok(())
}

/// Reads every parseable sidecar in `dir` whose blob still exists.
async fn load_sidecars(dir: &Path) -> Result<Vec<EntryMeta>, CacheError> {
    let mut metas = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(item) = read_dir.next_entry().await? {
        let path = item.path();
        let is_sidecar = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(META_SUFFIX));
        if !is_sidecar {
            continue;
        }

        let meta = match read_sidecar(&path).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable cache metadata");
                continue;
            }
        };
        if Fingerprint::from_stored(meta.fingerprint.to_string()).is_none() {
            warn!(path = %path.display(), "skipping cache metadata with invalid fingerprint");
            continue;
        }
        if !tokio::fs::try_exists(blob_path(dir, &meta.fingerprint, meta.format)).await? {
            debug!(path = %path.display(), "removing orphaned cache metadata");
            let _ = tokio::fs::remove_file(&path).await;
            continue;
        }
        metas.push(meta);
    }
    Ok(metas)
}

async fn read_sidecar(path: &Path) -> Result<EntryMeta, CacheError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
