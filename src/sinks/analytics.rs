use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Success,
    FallbackSuccess,
    Failed,
    CacheHit,
}

impl GenerationStatus {
    pub fn is_success(self) -> bool {
        !matches!(self, GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationStatus::Success => "success",
            GenerationStatus::FallbackSuccess => "fallback_success",
            GenerationStatus::Failed => "failed",
            GenerationStatus::CacheHit => "cache_hit",
        };
        f.write_str(s)
    }
}

/// One synthesis call, as seen by analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub status: GenerationStatus,
    pub fallback_triggered: bool,
    pub execution_ms: u64,
    pub text_length: usize,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub audio_duration_secs: Option<f64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsStats {
    pub total_generations: usize,
    pub successful: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub fallback_triggered: usize,
    pub providers: BTreeMap<String, usize>,
    pub avg_execution_ms: f64,
    pub avg_audio_duration_secs: f64,
    pub total_text_chars: usize,
    /// Percentages, absent when there is nothing to divide by.
    pub success_rate: Option<f64>,
    pub fallback_rate: Option<f64>,
}

impl AnalyticsStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a GenerationRecord>) -> Self {
        let mut stats = Self::default();
        let mut execution_total = 0u64;
        let mut durations = Vec::new();

        for record in records {
            stats.total_generations += 1;
            if record.status.is_success() {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            if record.status == GenerationStatus::CacheHit {
                stats.cache_hits += 1;
            }
            if record.fallback_triggered {
                stats.fallback_triggered += 1;
            }
            *stats.providers.entry(record.provider.clone()).or_default() += 1;
            execution_total += record.execution_ms;
            if let Some(duration) = record.audio_duration_secs.filter(|d| *d > 0.0) {
                durations.push(duration);
            }
            stats.total_text_chars += record.text_length;
        }

        if stats.total_generations > 0 {
            let total = stats.total_generations as f64;
            stats.avg_execution_ms = round2(execution_total as f64 / total);
            stats.success_rate = Some(round2(stats.successful as f64 / total * 100.0));
            stats.fallback_rate = Some(round2(stats.fallback_triggered as f64 / total * 100.0));
        }
        if !durations.is_empty() {
            stats.avg_audio_duration_secs =
                round2(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Receives one record per synthesis call. Recording never fails the caller.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, record: &GenerationRecord);

    /// Aggregates the records of the last `days` days, today included.
    fn stats(&self, days: u32) -> io::Result<AnalyticsStats>;
}

/// First day of a `days`-long window ending today. Windows reaching past the
/// calendar's start begin at its first day.
fn window_start(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(chrono::Days::new(u64::from(days.max(1)) - 1))
        .unwrap_or(NaiveDate::MIN)
}

const FILE_PREFIX: &str = "tts_analytics_";
const FILE_SUFFIX: &str = ".jsonl";

/// Appends records to one JSON-lines file per UTC day:
/// `<dir>/tts_analytics_YYYYMMDD.jsonl`.
///
/// Inside a tokio runtime the file write runs on the blocking pool, so
/// `record` never blocks an async worker thread.
pub struct JsonlAnalytics {
    dir: PathBuf,
    enabled: bool,
    write_lock: Arc<Mutex<()>>,
}

impl JsonlAnalytics {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> io::Result<Self> {
        let dir = dir.into();
        if enabled {
            fs::create_dir_all(&dir)?;
            info!(dir = %dir.display(), "analytics enabled");
        }
        Ok(Self {
            dir,
            enabled,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y%m%d")))
    }

    /// Daily files in the directory, with their dates, oldest first.
    fn daily_files(&self) -> io::Result<Vec<(NaiveDate, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let date = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix(FILE_PREFIX))
                .and_then(|name| name.strip_suffix(FILE_SUFFIX))
                .and_then(|stamp| NaiveDate::parse_from_str(stamp, "%Y%m%d").ok());
            if let Some(date) = date {
                files.push((date, path));
            }
        }
        files.sort();
        Ok(files)
    }
}

fn append_line(path: &Path, line: &str, lock: &Mutex<()>) -> io::Result<()> {
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

fn log_append(result: io::Result<()>, provider: &str, status: GenerationStatus, execution_ms: u64) {
    match result {
        Ok(()) => info!(provider, %status, execution_ms, "analytics logged"),
        Err(err) => error!(error = %err, "failed to log analytics"),
    }
}

impl AnalyticsSink for JsonlAnalytics {
    fn record(&self, record: &GenerationRecord) {
        if !self.enabled {
            return;
        }
        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                error!(error = %err, "failed to serialize analytics record");
                return;
            }
        };
        line.push('\n');
        let path = self.file_for(record.timestamp.date_naive());
        let (provider, status, execution_ms) =
            (record.provider.clone(), record.status, record.execution_ms);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = Arc::clone(&self.write_lock);
                handle.spawn_blocking(move || {
                    log_append(append_line(&path, &line, &lock), &provider, status, execution_ms);
                });
            }
            Err(_) => log_append(
                append_line(&path, &line, &self.write_lock),
                &provider,
                status,
                execution_ms,
            ),
        }
    }

    fn stats(&self, days: u32) -> io::Result<AnalyticsStats> {
        if !self.enabled {
            return Err(io::Error::other("analytics not enabled"));
        }
        let today = Utc::now().date_naive();
        let since = window_start(today, days);
        let mut records = Vec::new();
        for (date, path) in self.daily_files()? {
            if (since..=today).contains(&date) {
                read_records(&path, &mut records)?;
            }
        }
        Ok(AnalyticsStats::from_records(&records))
    }
}

fn read_records(path: &Path, out: &mut Vec<GenerationRecord>) -> io::Result<()> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => out.push(record),
            Err(err) => warn!(path = %path.display(), error = %err, "skipping malformed analytics line"),
        }
    }
    Ok(())
}

/// Keeps records in memory. Used by tests and when no analytics path is set.
#[derive(Default)]
pub struct MemoryAnalytics {
    records: Mutex<Vec<GenerationRecord>>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<GenerationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AnalyticsSink for MemoryAnalytics {
    fn record(&self, record: &GenerationRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }

    fn stats(&self, days: u32) -> io::Result<AnalyticsStats> {
        let since = window_start(Utc::now().date_naive(), days);
        let records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(AnalyticsStats::from_records(
            records.iter().filter(|r| r.timestamp.date_naive() >= since),
        ))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn record(provider: &str, status: GenerationStatus, fallback: bool, ms: u64) -> GenerationRecord {
        GenerationRecord {
            timestamp: Utc::now(),
            provider: provider.to_string(),
            status,
            fallback_triggered: fallback,
            execution_ms: ms,
            text_length: 11,
            voice_id: None,
            audio_duration_secs: Some(1.5),
            retry_count: 0,
            error: None,
        }
    }

    #[test]
    fn stats_aggregate_records() {
        let records = [
            record("primary", GenerationStatus::Success, false, 100),
            record("secondary", GenerationStatus::FallbackSuccess, true, 300),
            record("secondary", GenerationStatus::Failed, true, 200),
            record("primary", GenerationStatus::CacheHit, false, 0),
        ];
        let stats = AnalyticsStats::from_records(&records);

        assert_eq!(stats.total_generations, 4);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.fallback_triggered, 2);
        assert_eq!(stats.providers["primary"], 2);
        assert_eq!(stats.providers["secondary"], 2);
        assert_eq!(stats.avg_execution_ms, 150.0);
        assert_eq!(stats.success_rate, Some(75.0));
        assert_eq!(stats.fallback_rate, Some(50.0));
        assert_eq!(stats.total_text_chars, 44);
    }

    #[test]
    fn empty_stats_have_no_rates() {
        let stats = AnalyticsStats::from_records(std::iter::empty());
        assert_eq!(stats.total_generations, 0);
        assert!(stats.success_rate.is_none());
    }

    #[test]
    fn jsonl_sink_appends_daily_file() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAnalytics::new(dir.path(), true).unwrap();
        sink.record(&record("primary", GenerationStatus::Success, false, 120));
        sink.record(&record("secondary", GenerationStatus::FallbackSuccess, true, 80));

        let path = sink.file_for(Utc::now().date_naive());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"status\":\"fallback_success\""));

        let stats = sink.stats(1).unwrap();
        assert_eq!(stats.total_generations, 2);
        assert_eq!(stats.fallback_triggered, 1);
    }

    #[test]
    fn jsonl_sink_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAnalytics::new(dir.path(), true).unwrap();
        sink.record(&record("primary", GenerationStatus::Success, false, 10));
        let path = sink.file_for(Utc::now().date_naive());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();

        assert_eq!(sink.stats(7).unwrap().total_generations, 1);
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAnalytics::new(dir.path().join("off"), false).unwrap();
        sink.record(&record("primary", GenerationStatus::Success, false, 10));
        assert!(!dir.path().join("off").exists());
        assert!(sink.stats(1).is_err());
    }

    #[test]
    fn memory_sink_collects_records() {
        let sink = MemoryAnalytics::new();
        sink.record(&record("primary", GenerationStatus::Success, false, 10));
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.stats(1).unwrap().successful, 1);
    }

    #[test]
    fn huge_day_windows_cover_everything() {
        let memory = MemoryAnalytics::new();
        memory.record(&record("primary", GenerationStatus::Success, false, 10));
        assert_eq!(memory.stats(u32::MAX).unwrap().total_generations, 1);

        let dir = TempDir::new().unwrap();
        let jsonl = JsonlAnalytics::new(dir.path(), true).unwrap();
        jsonl.record(&record("primary", GenerationStatus::Success, false, 10));
        assert_eq!(jsonl.stats(4_000_000_000).unwrap().total_generations, 1);
    }

    #[test]
    fn stats_window_ignores_older_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAnalytics::new(dir.path(), true).unwrap();
        sink.record(&record("primary", GenerationStatus::Success, false, 10));

        let mut old = record("secondary", GenerationStatus::Success, false, 10);
        old.timestamp = Utc::now() - chrono::Duration::days(10);
        sink.record(&old);
        std::fs::write(dir.path().join("notes.jsonl"), "not analytics\n").unwrap();

        assert_eq!(sink.stats(1).unwrap().total_generations, 1);
        assert_eq!(sink.stats(30).unwrap().total_generations, 2);
    }

    #[tokio::test]
    async fn jsonl_sink_writes_on_the_blocking_pool() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAnalytics::new(dir.path(), true).unwrap();
        sink.record(&record("primary", GenerationStatus::Success, false, 10));

        let path = sink.file_for(Utc::now().date_naive());
        let mut lines = 0;
        for _ in 0..200 {
            lines = tokio::fs::read_to_string(&path)
                .await
                .map(|contents| contents.lines().count())
                .unwrap_or(0);
            if lines == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(lines, 1);
    }
}
