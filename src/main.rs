use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};

use voxqueue::SpeechService;
use voxqueue::cache::ResultCache;
use voxqueue::cli::{CacheAction, Cli, Command};
use voxqueue::config::Config;
use voxqueue::orchestrator::ProviderOrchestrator;
use voxqueue::payload::{BatchEntry, JobResult, SpeechJob};
use voxqueue::provider::{
    AudioFormat, FakeProvider, HttpProvider, ProviderKind, SpeechProvider, StreamingProvider,
    VoiceParams,
};
use voxqueue::queue::{Job, JobQueue, JobStatus};
use voxqueue::sinks::{
    AnalyticsSink, DirectoryUploader, JsonlAnalytics, MemoryAnalytics, ProgressSink,
    TracingProgress,
};
use voxqueue::telemetry;
use voxqueue::ui::{self, ConsoleProgress};

const POLL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        config.provider.default = ProviderKind::from(provider)
            .as_str()
            .to_string();
    }
    if cli.mock {
        config.provider.mock = true;
    }
    let workers = cli.workers.unwrap_or(config.queue.max_concurrent);

    if config.provider.mock {
        info!("mock mode: using simulated providers");
        let primary = FakeProvider::silent("primary");
        let secondary = FakeProvider::silent("secondary");
        execute(&config, primary, secondary, cli.command, workers).await
    } else {
        let primary = StreamingProvider::new(config.streaming_config());
        let secondary = HttpProvider::new(config.http_config())?;
        execute(&config, primary, secondary, cli.command, workers).await
    }
}

async fn execute<P, S>(
    config: &Config,
    primary: P,
    secondary: S,
    command: Command,
    workers: usize,
) -> anyhow::Result<()>
where
    P: SpeechProvider + 'static,
    S: SpeechProvider + 'static,
{
    let console = matches!(command, Command::Say { .. } | Command::Batch { .. })
        .then(|| Arc::new(ConsoleProgress::start("starting")));
    let progress: Arc<dyn ProgressSink> = match &console {
        Some(console) => console.clone(),
        None => Arc::new(TracingProgress),
    };
    let service = build(config, primary, secondary, progress).await?;

    let outcome = match command {
        Command::Say {
            text,
            voice,
            format,
            priority,
            out,
        } => {
            let job = SpeechJob {
                text,
                format: AudioFormat::from(format),
                provider: None,
                voice: VoiceParams {
                    voice_id: voice,
                    ..Default::default()
                },
            };
            say(&service, &job, priority, out.as_deref(), workers).await
        }
        Command::Batch { file } => {
            batch(&service, &file, workers, config.queue.retention_days).await
        }
        Command::Cache { action } => {
            match action {
                CacheAction::Stats => ui::print_report("Cache", &service.cache_stats()),
                CacheAction::Clear => {
                    let removed = service.cache_clear().await;
                    println!("Removed {removed} cache entries");
                }
            }
            Ok(())
        }
        Command::Analytics { days } => {
            let stats = service.analytics_stats(days)?;
            ui::print_report(&format!("Analytics ({days}d)"), &stats);
            Ok(())
        }
        Command::Health => {
            ui::print_report("Health", &service.health());
            Ok(())
        }
    };

    if let Some(console) = console {
        console.finish();
    }
    outcome
}

async fn build<P, S>(
    config: &Config,
    primary: P,
    secondary: S,
    progress: Arc<dyn ProgressSink>,
) -> anyhow::Result<SpeechService<P, S, DirectoryUploader>>
where
    P: SpeechProvider + 'static,
    S: SpeechProvider + 'static,
{
    let cache = ResultCache::open(config.cache_config())
        .await
        .context("failed to open the result cache")?;
    let analytics: Arc<dyn AnalyticsSink> = match &config.analytics.path {
        Some(dir) => Arc::new(JsonlAnalytics::new(dir, config.analytics.enabled)?),
        None => Arc::new(MemoryAnalytics::new()),
    };
    let orchestrator = ProviderOrchestrator::new(primary, secondary, Arc::new(cache))
        .with_config(config.orchestrator_config()?)
        .with_limits(config.limits.clone())
        .with_analytics(analytics);

    Ok(SpeechService::new(
        Arc::new(JobQueue::new(config.queue_config())),
        Arc::new(orchestrator),
        Arc::new(DirectoryUploader::new(&config.upload.dir)),
        progress,
        config.worker_config(),
    ))
}

async fn say<P, S>(
    service: &SpeechService<P, S, DirectoryUploader>,
    job: &SpeechJob,
    priority: u8,
    out: Option<&Path>,
    workers: usize,
) -> anyhow::Result<()>
where
    P: SpeechProvider + 'static,
    S: SpeechProvider + 'static,
{
    let id = service.enqueue(job, priority)?;
    let pool = service.spawn_workers(workers);
    let finished = service.wait_for(&id, POLL).await;
    pool.shutdown().await;
    let finished = finished?;

    ui::print_job(&finished);
    if finished.status != JobStatus::Completed {
        bail!(
            "job {} ended as {}: {}",
            finished.id,
            finished.status,
            finished.error.as_deref().unwrap_or("no error recorded")
        );
    }

    if let Some(out) = out {
        let source = audio_path(&finished).context("job result has no local audio file")?;
        tokio::fs::copy(&source, out)
            .await
            .with_context(|| format!("failed to copy {} to {}", source.display(), out.display()))?;
        println!("Saved audio to {}", out.display());
    }
    Ok(())
}

async fn batch<P, S>(
    service: &SpeechService<P, S, DirectoryUploader>,
    file: &Path,
    workers: usize,
    retention_days: u32,
) -> anyhow::Result<()>
where
    P: SpeechProvider + 'static,
    S: SpeechProvider + 'static,
{
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let entries: Vec<BatchEntry> =
        serde_json::from_str(&raw).with_context(|| format!("invalid batch file {}", file.display()))?;

    let mut ids = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match service.enqueue(&entry.job, entry.priority) {
            Ok(id) => ids.push(id),
            Err(err) => warn!(index, error = %err, "skipping batch entry"),
        }
    }
    info!(accepted = ids.len(), total = entries.len(), "batch enqueued");

    let pool = service.spawn_workers(workers);
    let mut failed = 0usize;
    for id in &ids {
        match service.wait_for(id, POLL).await {
            Ok(job) if job.status == JobStatus::Completed => {}
            Ok(_) => failed += 1,
            Err(err) => {
                warn!(job_id = %id, error = %err, "job disappeared");
                failed += 1;
            }
        }
    }
    pool.shutdown().await;

    let removed = service.cleanup(retention_days);
    if removed > 0 {
        info!(removed, "old jobs cleaned up");
    }
    ui::print_report("Queue", &service.stats());
    if failed > 0 {
        bail!("{failed} of {} jobs did not complete", ids.len());
    }
    Ok(())
}

fn audio_path(job: &Job) -> Option<PathBuf> {
    let result = JobResult::from_data(job.result.as_ref()?)?;
    let url = result.audio_url?;
    url.strip_prefix("file://").map(PathBuf::from)
}
