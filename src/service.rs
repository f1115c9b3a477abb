//! Front-door operations over the queue, orchestrator and cache.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::cache::CacheStats;
use crate::error::{QueueError, ValidationError};
use crate::orchestrator::{HealthReport, ProviderOrchestrator};
use crate::payload::{SPEECH_JOB, SpeechJob};
use crate::provider::{ProviderKind, SpeechProvider};
use crate::queue::{Job, JobId, JobQueue, QueueStats};
use crate::sinks::{AnalyticsStats, ArtifactUploader, ProgressSink};
use crate::worker::{Worker, WorkerConfig, WorkerPool};

pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    #[serde(flatten)]
    pub providers: HealthReport,
    pub queue: QueueStats,
}

pub struct SpeechService<P, S, U> {
    queue: Arc<JobQueue>,
    orchestrator: Arc<ProviderOrchestrator<P, S>>,
    worker: Arc<Worker<P, S, U>>,
}

impl<P, S, U> SpeechService<P, S, U>
where
    P: SpeechProvider + 'static,
    S: SpeechProvider + 'static,
    U: ArtifactUploader + 'static,
{
    pub fn new(
        queue: Arc<JobQueue>,
        orchestrator: Arc<ProviderOrchestrator<P, S>>,
        uploader: Arc<U>,
        progress: Arc<dyn ProgressSink>,
        worker_config: WorkerConfig,
    ) -> Self {
        let worker = Arc::new(Worker::new(
            queue.clone(),
            orchestrator.clone(),
            uploader,
            progress,
            worker_config,
        ));
        Self {
            queue,
            orchestrator,
            worker,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<ProviderOrchestrator<P, S>> {
        &self.orchestrator
    }

    pub fn worker(&self) -> &Arc<Worker<P, S, U>> {
        &self.worker
    }

    /// Validates and enqueues a speech job.
    pub fn enqueue(&self, job: &SpeechJob, priority: u8) -> Result<JobId, ValidationError> {
        if priority > MAX_PRIORITY {
            return Err(ValidationError::Priority(priority));
        }
        self.orchestrator.limits().validate(&job.text)?;
        let data = job.to_data()?;
        Ok(self.queue.enqueue(SPEECH_JOB, data, priority, None))
    }

    pub fn get_job(&self, id: &str) -> Result<Job, QueueError> {
        self.queue
            .get_job(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    pub fn cancel(&self, id: &str) -> Result<(), QueueError> {
        self.queue.cancel(id)
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Deletes finished jobs older than `days` days.
    pub fn cleanup(&self, days: u32) -> usize {
        self.queue
            .cleanup(Duration::from_secs(u64::from(days) * 24 * 3600))
    }

    pub fn set_provider(&self, name: &str) -> Result<ProviderKind, ValidationError> {
        self.orchestrator.set_provider(name)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.orchestrator.cache().stats()
    }

    pub async fn cache_clear(&self) -> usize {
        self.orchestrator.cache().clear().await
    }

    pub fn health(&self) -> ServiceHealth {
        ServiceHealth {
            providers: self.orchestrator.health(),
            queue: self.queue.stats(),
        }
    }

    pub fn analytics_stats(&self, days: u32) -> io::Result<AnalyticsStats> {
        self.orchestrator.analytics().stats(days)
    }

    pub fn spawn_workers(&self, count: usize) -> WorkerPool {
        WorkerPool::spawn(self.worker.clone(), count)
    }

    /// Waits until job `id` reaches a terminal status.
    pub async fn wait_for(&self, id: &str, poll: Duration) -> Result<Job, QueueError> {
        loop {
            let job = self.get_job(id)?;
            if job.status.is_terminal() {
                info!(job_id = %id, status = %job.status, "job finished");
                return Ok(job);
            }
            self.queue.wait_for_change(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, ResultCache};
    use crate::orchestrator::OrchestratorConfig;
    use crate::provider::FakeProvider;
    use crate::queue::{JobStatus, QueueConfig};
    use crate::sinks::{MemoryAnalytics, NoUpload, TracingProgress};

    fn service() -> SpeechService<FakeProvider, FakeProvider, NoUpload> {
        let orchestrator = ProviderOrchestrator::new(
            FakeProvider::silent("primary"),
            FakeProvider::silent("secondary"),
            Arc::new(ResultCache::memory(CacheConfig::default())),
        )
        .with_config(OrchestratorConfig {
            retry_delay: Duration::ZERO,
            ..Default::default()
        })
        .with_analytics(Arc::new(MemoryAnalytics::new()));
        SpeechService::new(
            Arc::new(JobQueue::new(QueueConfig::default())),
            Arc::new(orchestrator),
            Arc::new(NoUpload),
            Arc::new(TracingProgress),
            WorkerConfig::default(),
        )
    }

    #[test]
    fn enqueue_validates_before_queueing() {
        let service = service();
        assert!(matches!(
            service.enqueue(&SpeechJob::new(""), 5),
            Err(ValidationError::EmptyText)
        ));
        assert!(matches!(
            service.enqueue(&SpeechJob::new("Hello"), 11),
            Err(ValidationError::Priority(11))
        ));
        assert!(matches!(
            service.enqueue(&SpeechJob::new("x".repeat(3001)), 5),
            Err(ValidationError::TooLong { .. })
        ));
        assert_eq!(service.stats().total_jobs, 0);
    }

    #[test]
    fn cancel_and_lookup() {
        let service = service();
        let id = service.enqueue(&SpeechJob::new("Hello"), 9).unwrap();
        assert_eq!(service.stats().queue_depths.high, 1);

        service.cancel(&id).unwrap();
        assert_eq!(service.get_job(&id).unwrap().status, JobStatus::Cancelled);
        assert!(matches!(
            service.get_job("missing"),
            Err(QueueError::JobNotFound(_))
        ));
        assert_eq!(service.cleanup(7), 0);
        assert_eq!(service.cleanup(u32::MAX), 0);
        assert!(service.get_job(&id).is_ok());
    }

    #[tokio::test]
    async fn jobs_run_and_feed_cache_and_analytics() {
        let service = service();
        let id = service.enqueue(&SpeechJob::new("Hello world"), 5).unwrap();
        let pool = service.spawn_workers(1);

        let job = service
            .wait_for(&id, Duration::from_millis(20))
            .await
            .unwrap();
        pool.shutdown().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(service.cache_stats().entries, 1);
        assert_eq!(service.analytics_stats(1).unwrap().successful, 1);
        assert_eq!(service.cache_clear().await, 1);
        assert_eq!(service.cache_stats().entries, 0);

        service.set_provider("secondary").unwrap();
        let health = service.health();
        assert_eq!(health.providers.current_provider, ProviderKind::Secondary);
        assert_eq!(health.queue.total_jobs, 1);
    }
}
