//! The scheduling glue: dequeue, synthesize, upload, report.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::JobFailure;
use crate::orchestrator::ProviderOrchestrator;
use crate::payload::{JobResult, SpeechJob};
use crate::provider::SpeechProvider;
use crate::queue::{FailOutcome, Job, JobData, JobId, JobQueue, JobStatus};
use crate::sinks::{ArtifactUploader, ProgressEvent, ProgressSink};

/// What one `run_once` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing runnable: every tier empty or the concurrency cap reached.
    Idle,
    Completed(JobId),
    Requeued(JobId),
    DeadLettered(JobId),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Spend queue retries on jobs whose providers were all exhausted.
    pub retry_after_failover: bool,
    /// Upper bound on how long an idle worker sleeps before polling again.
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_after_failover: true,
            idle_poll: Duration::from_millis(500),
        }
    }
}

pub struct Worker<P, S, U> {
    queue: Arc<JobQueue>,
    orchestrator: Arc<ProviderOrchestrator<P, S>>,
    uploader: Arc<U>,
    progress: Arc<dyn ProgressSink>,
    config: WorkerConfig,
}

impl<P, S, U> Worker<P, S, U>
where
    P: SpeechProvider,
    S: SpeechProvider,
    U: ArtifactUploader,
{
    pub fn new(
        queue: Arc<JobQueue>,
        orchestrator: Arc<ProviderOrchestrator<P, S>>,
        uploader: Arc<U>,
        progress: Arc<dyn ProgressSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            uploader,
            progress,
            config,
        }
    }

    /// Dequeue and process at most one job.
    pub async fn run_once(&self) -> Tick {
        match self.queue.dequeue() {
            Some(job) => self.process(job).await,
            None => Tick::Idle,
        }
    }

    /// Process jobs one after another until nothing is runnable.
    pub async fn run_until_idle(&self) -> Vec<Tick> {
        let mut ticks = Vec::new();
        loop {
            match self.run_once().await {
                Tick::Idle => return ticks,
                tick => ticks.push(tick),
            }
        }
    }

    /// Keep processing until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("worker started");
        while !*shutdown.borrow() {
            if self.run_once().await != Tick::Idle {
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.queue.wait_for_change(self.config.idle_poll) => {}
            }
        }
        info!("worker stopped");
    }

    async fn process(&self, job: Job) -> Tick {
        self.emit(&job.id, JobStatus::Processing, "synthesis started", 10);

        match self.execute(&job).await {
            Ok(result) => {
                if let Err(err) = self.queue.complete(&job.id, result) {
                    error!(job_id = %job.id, error = %err, "could not record completion");
                }
                self.emit(&job.id, JobStatus::Completed, "audio ready", 100);
                Tick::Completed(job.id)
            }
            Err(failure) => {
                let retry = failure.is_retryable(self.config.retry_after_failover);
                let message = failure.to_string();
                match self.queue.fail(&job.id, &message, retry) {
                    Ok(FailOutcome::Requeued { retry }) => {
                        self.emit(
                            &job.id,
                            JobStatus::Retrying,
                            format!("retry {retry}: {message}"),
                            0,
                        );
                        Tick::Requeued(job.id)
                    }
                    Ok(FailOutcome::DeadLettered) => {
                        self.emit(&job.id, JobStatus::Failed, message, 100);
                        Tick::DeadLettered(job.id)
                    }
                    Err(err) => {
                        error!(job_id = %job.id, error = %err, "could not record failure");
                        Tick::DeadLettered(job.id)
                    }
                }
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<JobData, JobFailure> {
        let speech = SpeechJob::from_data(&job.payload)?;
        let request = speech.request();
        debug!(job_id = %job.id, chars = request.text.chars().count(), "synthesizing");

        let synthesized = self.orchestrator.synthesize(&request, speech.provider).await?;
        self.emit(&job.id, JobStatus::Processing, "uploading audio", 80);

        let remote_key = format!("tts/{}/audio.{}", job.id, synthesized.artifact.format.extension());
        let audio_url = self
            .uploader
            .upload(&synthesized.artifact, &remote_key)
            .await?;

        Ok(JobResult::new(&synthesized, audio_url).into_data())
    }

    fn emit(&self, job_id: &str, status: JobStatus, message: impl Into<String>, percent: u8) {
        self.progress
            .emit(&ProgressEvent::new(job_id, status, message, percent));
    }
}

/// N worker tasks sharing one [`Worker`], stopped together.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<P, S, U>(worker: Arc<Worker<P, S, U>>, count: usize) -> Self
    where
        P: SpeechProvider + 'static,
        S: SpeechProvider + 'static,
        U: ArtifactUploader + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handles = (0..count.max(1))
            .map(|id| {
                let worker = Arc::clone(&worker);
                let rx = rx.clone();
                tokio::spawn(
                    async move { worker.run(rx).await }.instrument(info_span!("worker", id)),
                )
            })
            .collect();
        info!(workers = count.max(1), "worker pool started");
        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every worker and wait for them to finish their current job.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task panicked");
            }
        }
        info!("worker pool stopped");
    }
}
