use serde::Serialize;
use tracing::info;

use crate::queue::{JobId, JobStatus};

/// A progress notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(job_id: &str, status: JobStatus, message: impl Into<String>, percent: u8) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            message: message.into(),
            percent: percent.min(100),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Writes each event as a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: &ProgressEvent) {
        info!(
            job_id = %event.job_id,
            status = %event.status,
            percent = event.percent,
            "{}",
            event.message
        );
    }
}
