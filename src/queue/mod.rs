//! Priority-tiered, concurrency-capped job queue.
//!
//! All bookkeeping (job table, tier queues, active set, dead-letter list)
//! lives behind one mutex so the concurrency cap and the tier ordering hold
//! under concurrent dequeues. The lock is never held across an `.await`.

mod job;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;

pub use job::{Job, JobData, JobId, JobStatus, Tier};

/// Tunables for a [`JobQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Default retry budget when `enqueue` is not given one.
    pub max_retries: u32,
    /// Maximum number of jobs in `Processing` at once.
    pub max_concurrent: usize,
    /// Advisory wall-clock budget per job. Reported, not enforced here.
    pub job_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_concurrent: 5,
            job_timeout: Duration::from_secs(300),
        }
    }
}

/// What `fail` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-enqueued into the low tier with the given retry number.
    Requeued { retry: u32 },
    /// Moved to the dead-letter queue.
    DeadLettered,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierDepths {
    pub high: usize,
    pub default: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub max_concurrent: usize,
    pub status_counts: BTreeMap<JobStatus, usize>,
    pub queue_depths: TierDepths,
    pub dead_letter_queue: usize,
    pub max_retries: u32,
    pub job_timeout_secs: u64,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    tiers: [VecDeque<JobId>; 3],
    active: HashSet<JobId>,
    dead_letter: Vec<JobId>,
}

impl QueueState {
    fn job_mut(&mut self, id: &str) -> Result<&mut Job, QueueError> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    fn remove_from_tiers(&mut self, id: &str) {
        for tier in &mut self.tiers {
            tier.retain(|queued| queued != id);
        }
    }
}

pub struct JobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    changed: Notify,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        info!(
            max_retries = config.max_retries,
            max_concurrent = config.max_concurrent,
            job_timeout_secs = config.job_timeout.as_secs(),
            "job queue initialized"
        );
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            changed: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // A panic while holding the lock leaves the bookkeeping consistent (every
    // mutation is a handful of infallible steps), so poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job and route it into the tier matching its priority.
    pub fn enqueue(
        &self,
        job_type: &str,
        payload: JobData,
        priority: u8,
        max_retries: Option<u32>,
    ) -> JobId {
        let max_retries = max_retries.unwrap_or(self.config.max_retries);
        let job = Job::new(job_type.to_string(), payload, priority, max_retries);
        let id = job.id.clone();
        let tier = job.tier();

        {
            let mut state = self.state();
            state.tiers[tier.index()].push_back(id.clone());
            state.jobs.insert(id.clone(), job);
        }

        info!(job_id = %id, job_type, priority, %tier, "enqueued job");
        self.changed.notify_waiters();
        id
    }

    /// Pop the next job, honouring the concurrency cap and tier order.
    ///
    /// Returns `None` when the cap is reached or every tier is empty.
    pub fn dequeue(&self) -> Option<Job> {
        let mut state = self.state();

        if state.active.len() >= self.config.max_concurrent {
            debug!(
                active = state.active.len(),
                max_concurrent = self.config.max_concurrent,
                "concurrency limit reached"
            );
            return None;
        }

        for tier in Tier::ORDER {
            while let Some(id) = state.tiers[tier.index()].pop_front() {
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                if !job.status.can_transition_to(JobStatus::Processing) {
                    continue;
                }
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                let job = job.clone();
                state.active.insert(id.clone());

                info!(job_id = %id, %tier, "dequeued job");
                return Some(job);
            }
        }

        None
    }

    /// Record a successful result.
    pub fn complete(&self, id: &str, result: JobData) -> Result<(), QueueError> {
        {
            let mut state = self.state();
            let job = state.job_mut(id)?;
            if !job.status.can_transition_to(JobStatus::Completed) {
                return Err(QueueError::NotProcessing {
                    id: id.to_string(),
                    status: job.status,
                });
            }
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
            state.active.remove(id);
        }

        info!(job_id = %id, "job completed");
        self.changed.notify_waiters();
        Ok(())
    }

    /// Record a failure and apply the retry / dead-letter policy.
    ///
    /// With `retry` set and budget left, `retry_count` is bumped and the job
    /// re-enters the low tier so it cannot starve fresh high-priority work.
    /// Otherwise the job becomes `Failed` and lands in the dead-letter queue
    /// with `retry_count` unchanged, so it never exceeds `max_retries`.
    pub fn fail(&self, id: &str, error: &str, retry: bool) -> Result<FailOutcome, QueueError> {
        let outcome = {
            let mut state = self.state();
            let job = state.job_mut(id)?;
            if job.status != JobStatus::Processing {
                return Err(QueueError::NotProcessing {
                    id: id.to_string(),
                    status: job.status,
                });
            }
            job.error = Some(error.to_string());

            let outcome = if retry && job.has_retries_left() {
                job.retry_count += 1;
                job.status = JobStatus::Retrying;
                FailOutcome::Requeued {
                    retry: job.retry_count,
                }
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                FailOutcome::DeadLettered
            };

            let max_retries = job.max_retries;
            state.active.remove(id);
            match outcome {
                FailOutcome::Requeued { retry } => {
                    state.tiers[Tier::Low.index()].push_back(id.to_string());
                    warn!(job_id = %id, retry, max_retries, error, "job failed, retrying");
                }
                FailOutcome::DeadLettered => {
                    state.dead_letter.push(id.to_string());
                    error!(job_id = %id, error, "job failed permanently");
                }
            }
            outcome
        };

        self.changed.notify_waiters();
        Ok(outcome)
    }

    /// Cancel a job that is still waiting. Processing jobs are left alone.
    pub fn cancel(&self, id: &str) -> Result<(), QueueError> {
        {
            let mut state = self.state();
            let job = state.job_mut(id)?;
            if !job.status.can_transition_to(JobStatus::Cancelled) {
                warn!(job_id = %id, status = %job.status, "cannot cancel job");
                return Err(QueueError::NotCancellable {
                    id: id.to_string(),
                    status: job.status,
                });
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            state.remove_from_tiers(id);
        }

        info!(job_id = %id, "job cancelled");
        self.changed.notify_waiters();
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.state().jobs.get(id).cloned()
    }

    /// Jobs that failed permanently, oldest first.
    pub fn dead_letter(&self) -> Vec<Job> {
        let state = self.state();
        state
            .dead_letter
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    /// Permanently delete terminal jobs finished more than `retention` ago.
    pub fn cleanup(&self, retention: Duration) -> usize {
        // A retention reaching past the calendar's start keeps everything.
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return 0;
        };

        let mut state = self.state();
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .filter(|job| job.completed_at.is_some_and(|done| done < cutoff))
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            state.jobs.remove(id);
        }
        state.dead_letter.retain(|id| !expired.contains(id));

        info!(deleted = expired.len(), "cleaned up old jobs");
        expired.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state();

        let mut status_counts: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for job in state.jobs.values() {
            *status_counts.entry(job.status).or_insert(0) += 1;
        }

        QueueStats {
            total_jobs: state.jobs.len(),
            active_jobs: state.active.len(),
            max_concurrent: self.config.max_concurrent,
            status_counts,
            queue_depths: TierDepths {
                high: state.tiers[Tier::High.index()].len(),
                default: state.tiers[Tier::Default.index()].len(),
                low: state.tiers[Tier::Low.index()].len(),
            },
            dead_letter_queue: state.dead_letter.len(),
            max_retries: self.config.max_retries,
            job_timeout_secs: self.config.job_timeout.as_secs(),
        }
    }

    /// Number of jobs waiting in any tier.
    pub fn pending(&self) -> usize {
        self.state().tiers.iter().map(VecDeque::len).sum()
    }

    /// Number of jobs currently processing.
    pub fn active(&self) -> usize {
        self.state().active.len()
    }

    /// Sleep until the queue changes or `max_wait` passes.
    pub async fn wait_for_change(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.changed.notified()).await;
    }
}
