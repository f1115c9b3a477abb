use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type JobId = String;

/// Opaque key-value data attached to a job (input payload or result).
pub type JobData = Map<String, Value>;

/// Lifecycle status of a job.
///
/// `Queued → Processing → {Completed | Retrying → Processing | Failed}`, and
/// `Queued | Retrying → Cancelled`. `Retrying` jobs sit in the low tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Retrying,
        JobStatus::Cancelled,
    ];

    /// Whether the job is waiting in one of the tier queues.
    pub fn is_waiting(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Retrying)
    }

    /// Terminal statuses are eligible for cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued | Retrying, Processing) => true,
            (Queued | Retrying, Cancelled) => true,
            (Processing, Completed | Retrying | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Priority bucket governing dequeue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Default,
    Low,
}

impl Tier {
    /// Scan order used by dequeue.
    pub const ORDER: [Tier; 3] = [Tier::High, Tier::Default, Tier::Low];

    pub fn for_priority(priority: u8) -> Self {
        if priority >= 8 {
            Tier::High
        } else if priority <= 3 {
            Tier::Low
        } else {
            Tier::Default
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Tier::High => 0,
            Tier::Default => 1,
            Tier::Low => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::High => write!(f, "high"),
            Tier::Default => write!(f, "default"),
            Tier::Low => write!(f, "low"),
        }
    }
}

/// A unit of work owned by the [`JobQueue`](super::JobQueue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub payload: JobData,
    pub result: Option<JobData>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: u8,
}

impl Job {
    pub fn new(job_type: String, payload: JobData, priority: u8, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type,
            status: JobStatus::Queued,
            payload,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            priority,
        }
    }

    pub fn tier(&self) -> Tier {
        Tier::for_priority(self.priority)
    }

    /// Whether another queue-level retry is still available.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_creation_defaults() {
        let job = Job::new("tts".into(), JobData::new(), 5, 3);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.started_at.is_none());
        assert!(job.result.is_none());
        assert_eq!(job.tier(), Tier::Default);
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(Tier::for_priority(10), Tier::High);
        assert_eq!(Tier::for_priority(8), Tier::High);
        assert_eq!(Tier::for_priority(7), Tier::Default);
        assert_eq!(Tier::for_priority(4), Tier::Default);
        assert_eq!(Tier::for_priority(3), Tier::Low);
        assert_eq!(Tier::for_priority(0), Tier::Low);
    }

    #[test]
    fn processing_cannot_be_cancelled() {
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn terminal_statuses_are_final() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(from.is_terminal());
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Retrying).unwrap();
        assert_eq!(json, r#""retrying""#);
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
    }
}
