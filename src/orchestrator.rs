use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::cache::{CacheKey, Fingerprint, ResultCache};
use crate::error::{SynthesisError, ValidationError};
use crate::limits::Limits;
use crate::provider::{Artifact, ProviderKind, SpeechProvider, SynthesisRequest};
use crate::sinks::{AnalyticsSink, GenerationRecord, GenerationStatus, MemoryAnalytics};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Provider used when a request does not force one.
    pub default_provider: ProviderKind,
    /// Attempts against the primary before failing over.
    pub primary_max_retries: u32,
    /// Fixed pause between primary attempts.
    pub retry_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::Primary,
            primary_max_retries: 3,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

/// How a successful synthesis was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub provider_used: ProviderKind,
    pub fingerprint: Fingerprint,
    pub cache_hit: bool,
    pub fallback_triggered: bool,
    /// Provider calls made, across both providers.
    pub attempts: u32,
    /// Failed primary attempts before the one that produced audio.
    pub retry_count: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Synthesized {
    pub artifact: Artifact,
    pub telemetry: Telemetry,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub current_provider: ProviderKind,
    pub primary: serde_json::Value,
    pub secondary: serde_json::Value,
    pub primary_max_retries: u32,
    pub retry_delay_ms: u64,
    pub cache_enabled: bool,
    pub cache_entries: usize,
}

/// Bookkeeping for one synthesis call.
struct Run<'a> {
    request: &'a SynthesisRequest,
    key: CacheKey<'a>,
    started: Instant,
    attempts: u32,
    failed_primary: u32,
    fallback: bool,
}

impl Run<'_> {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Cache lookup, bounded retries against the primary, single-shot failover
/// to the secondary, and cache write-back.
pub struct ProviderOrchestrator<P, S> {
    primary: P,
    secondary: S,
    cache: Arc<ResultCache>,
    analytics: Arc<dyn AnalyticsSink>,
    limits: Limits,
    config: OrchestratorConfig,
    current: RwLock<ProviderKind>,
}

impl<P: SpeechProvider, S: SpeechProvider> ProviderOrchestrator<P, S> {
    pub fn new(primary: P, secondary: S, cache: Arc<ResultCache>) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            primary,
            secondary,
            cache,
            analytics: Arc::new(MemoryAnalytics::new()),
            limits: Limits::default(),
            current: RwLock::new(config.default_provider),
            config,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.current = RwLock::new(config.default_provider);
        self.config = config;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn analytics(&self) -> &Arc<dyn AnalyticsSink> {
        &self.analytics
    }

    pub fn current_provider(&self) -> ProviderKind {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Administrative override of the process-wide provider.
    pub fn set_provider(&self, name: &str) -> Result<ProviderKind, ValidationError> {
        let kind: ProviderKind = name.parse()?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = kind;
        info!(provider = %kind, "provider manually set");
        Ok(kind)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            current_provider: self.current_provider(),
            primary: self.primary.describe(),
            secondary: self.secondary.describe(),
            primary_max_retries: self.config.primary_max_retries,
            retry_delay_ms: u64::try_from(self.config.retry_delay.as_millis()).unwrap_or(u64::MAX),
            cache_enabled: self.cache.is_enabled(),
            cache_entries: self.cache.len(),
        }
    }

    /// Produces audio for `request`, from the cache when possible.
    ///
    /// `force` overrides the current provider for this call only. Transport
    /// failures against the primary are retried up to the configured budget;
    /// an explicit rejection fails over immediately.
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
        force: Option<ProviderKind>,
    ) -> Result<Synthesized, SynthesisError> {
        self.limits.validate(&request.text)?;

        let effective = force.unwrap_or_else(|| self.current_provider());
        let mut run = Run {
            request,
            key: CacheKey::new(
                &request.text,
                effective.as_str(),
                request.voice.voice_id.as_deref(),
                request.format,
            ),
            started: Instant::now(),
            attempts: 0,
            failed_primary: 0,
            fallback: false,
        };

        if let Some(artifact) = self.cache.get(&run.key).await {
            let telemetry = self.telemetry(&run, effective, true);
            self.record(&run, &telemetry, Some(&artifact), None);
            return Ok(Synthesized { artifact, telemetry });
        }

        let mut primary_error = None;
        if effective == ProviderKind::Primary {
            match self.try_primary(&mut run).await {
                Ok(artifact) => return Ok(self.finish(&run, ProviderKind::Primary, artifact).await),
                Err(err) => primary_error = Some(err),
            }
            run.fallback = true;
            info!("primary exhausted, failing over to secondary");
        }

        run.attempts += 1;
        match self.secondary.synthesize(request).await {
            Ok(artifact) => Ok(self.finish(&run, ProviderKind::Secondary, artifact).await),
            Err(err) => {
                error!(provider = self.secondary.name(), error = %err, "secondary failed");
                let err = SynthesisError::ProvidersExhausted {
                    primary: primary_error,
                    secondary: err.to_string(),
                };
                let telemetry = self.telemetry(&run, ProviderKind::Secondary, false);
                self.record(&run, &telemetry, None, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Runs the primary's retry loop. Returns the last error on exhaustion.
    async fn try_primary(&self, run: &mut Run<'_>) -> Result<Artifact, String> {
        let max = self.config.primary_max_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max {
            run.attempts += 1;
            match self.primary.synthesize(run.request).await {
                Ok(artifact) => return Ok(artifact),
                Err(err) => {
                    run.failed_primary += 1;
                    last_error = err.to_string();
                    if !err.is_retryable() {
                        warn!(attempt, error = %err, "primary rejected the request");
                        break;
                    }
                    warn!(attempt, max, error = %err, "primary attempt failed");
                    if attempt < max {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn finish(&self, run: &Run<'_>, provider: ProviderKind, artifact: Artifact) -> Synthesized {
        if let Err(err) = self.cache.put(&run.key, &artifact).await {
            warn!(error = %err, "failed to cache artifact");
        }
        let telemetry = self.telemetry(run, provider, false);
        info!(
            provider = %provider,
            fallback = telemetry.fallback_triggered,
            attempts = telemetry.attempts,
            elapsed_ms = telemetry.elapsed_ms,
            "synthesis completed"
        );
        self.record(run, &telemetry, Some(&artifact), None);
        Synthesized { artifact, telemetry }
    }

    fn telemetry(&self, run: &Run<'_>, provider: ProviderKind, cache_hit: bool) -> Telemetry {
        Telemetry {
            provider_used: provider,
            fingerprint: run.key.fingerprint(),
            cache_hit,
            fallback_triggered: run.fallback,
            attempts: run.attempts,
            retry_count: run.failed_primary,
            elapsed_ms: run.elapsed_ms(),
        }
    }

    fn record(
        &self,
        run: &Run<'_>,
        telemetry: &Telemetry,
        artifact: Option<&Artifact>,
        error: Option<String>,
    ) {
        let status = match (&error, telemetry.cache_hit, telemetry.fallback_triggered) {
            (Some(_), _, _) => GenerationStatus::Failed,
            (None, true, _) => GenerationStatus::CacheHit,
            (None, false, true) => GenerationStatus::FallbackSuccess,
            (None, false, false) => GenerationStatus::Success,
        };
        self.analytics.record(&GenerationRecord {
            timestamp: Utc::now(),
            provider: telemetry.provider_used.to_string(),
            status,
            fallback_triggered: telemetry.fallback_triggered,
            execution_ms: telemetry.elapsed_ms,
            text_length: run.request.text.chars().count(),
            voice_id: run.request.voice.voice_id.clone(),
            audio_duration_secs: artifact.map(Artifact::duration_secs),
            retry_count: telemetry.retry_count,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::provider::{FakeOutcome, FakeProvider};

    type Fakes = (Arc<FakeProvider>, Arc<FakeProvider>, Arc<MemoryAnalytics>);

    fn orchestrator(
        primary: FakeProvider,
        secondary: FakeProvider,
    ) -> (ProviderOrchestrator<Arc<FakeProvider>, Arc<FakeProvider>>, Fakes) {
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        let analytics = Arc::new(MemoryAnalytics::new());
        let orch = ProviderOrchestrator::new(
            primary.clone(),
            secondary.clone(),
            Arc::new(ResultCache::memory(CacheConfig::default())),
        )
        .with_config(OrchestratorConfig {
            retry_delay: Duration::ZERO,
            ..Default::default()
        })
        .with_analytics(analytics.clone());
        (orch, (primary, secondary, analytics))
    }

    fn statuses(analytics: &MemoryAnalytics) -> Vec<GenerationStatus> {
        analytics.records().iter().map(|r| r.status).collect()
    }

    #[tokio::test]
    async fn retries_primary_then_serves_from_cache() {
        let (orch, (primary, secondary, analytics)) = orchestrator(
            FakeProvider::scripted("primary", vec![FakeOutcome::Timeout, FakeOutcome::Timeout]),
            FakeProvider::silent("secondary"),
        );
        let request = SynthesisRequest::new("Hello world");

        let first = orch.synthesize(&request, None).await.unwrap();
        assert_eq!(first.telemetry.provider_used, ProviderKind::Primary);
        assert!(!first.telemetry.fallback_triggered);
        assert!(!first.telemetry.cache_hit);
        assert_eq!(first.telemetry.retry_count, 2);
        assert_eq!(first.telemetry.attempts, 3);
        assert_eq!(primary.calls(), 3);

        let key = CacheKey::new("Hello world", "primary", None, request.format);
        assert!(orch.cache().contains(&key));
        assert_eq!(first.telemetry.fingerprint, key.fingerprint());

        let second = orch.synthesize(&request, None).await.unwrap();
        assert!(second.telemetry.cache_hit);
        assert!(!second.telemetry.fallback_triggered);
        assert_eq!(second.telemetry.retry_count, 0);
        assert_eq!(second.artifact, first.artifact);
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 0);

        assert_eq!(
            statuses(&analytics),
            vec![GenerationStatus::Success, GenerationStatus::CacheHit]
        );
    }

    #[tokio::test]
    async fn exhausted_primary_fails_over() {
        let (orch, (primary, secondary, analytics)) = orchestrator(
            FakeProvider::failing("primary", FakeOutcome::Timeout),
            FakeProvider::silent("secondary"),
        );

        let result = orch
            .synthesize(&SynthesisRequest::new("Hello world"), None)
            .await
            .unwrap();

        assert!(result.telemetry.fallback_triggered);
        assert_eq!(result.telemetry.provider_used, ProviderKind::Secondary);
        assert_eq!(result.telemetry.attempts, 4);
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(statuses(&analytics), vec![GenerationStatus::FallbackSuccess]);
    }

    #[tokio::test]
    async fn rejection_skips_remaining_primary_attempts() {
        let (orch, (primary, secondary, _)) = orchestrator(
            FakeProvider::failing("primary", FakeOutcome::Reject("voice not found".into())),
            FakeProvider::silent("secondary"),
        );

        let result = orch
            .synthesize(&SynthesisRequest::new("Hello world"), None)
            .await
            .unwrap();

        assert!(result.telemetry.fallback_triggered);
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn both_failing_caches_nothing() {
        let (orch, (_, _, analytics)) = orchestrator(
            FakeProvider::failing("primary", FakeOutcome::Timeout),
            FakeProvider::failing("secondary", FakeOutcome::Reject("status 500".into())),
        );

        let err = orch
            .synthesize(&SynthesisRequest::new("Hello world"), None)
            .await
            .unwrap_err();

        match err {
            SynthesisError::ProvidersExhausted { primary, secondary } => {
                assert!(primary.unwrap().contains("no frame received"));
                assert!(secondary.contains("status 500"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(orch.cache().is_empty());
        let records = analytics.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, GenerationStatus::Failed);
        assert!(records[0].error.is_some());
    }

    #[tokio::test]
    async fn secondary_selection_skips_primary() {
        let (orch, (primary, secondary, _)) = orchestrator(
            FakeProvider::silent("primary"),
            FakeProvider::silent("secondary"),
        );
        orch.set_provider("secondary").unwrap();

        let result = orch
            .synthesize(&SynthesisRequest::new("Hello world"), None)
            .await
            .unwrap();

        assert_eq!(result.telemetry.provider_used, ProviderKind::Secondary);
        assert!(!result.telemetry.fallback_triggered);
        assert_eq!(primary.calls(), 0);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn forced_provider_overrides_current() {
        let (orch, (primary, secondary, _)) = orchestrator(
            FakeProvider::silent("primary"),
            FakeProvider::silent("secondary"),
        );

        orch.synthesize(&SynthesisRequest::new("Hi"), Some(ProviderKind::Secondary))
            .await
            .unwrap();

        assert_eq!(orch.current_provider(), ProviderKind::Primary);
        assert_eq!(primary.calls(), 0);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_text_never_reaches_providers() {
        let (orch, (primary, secondary, analytics)) = orchestrator(
            FakeProvider::silent("primary"),
            FakeProvider::silent("secondary"),
        );

        let err = orch
            .synthesize(&SynthesisRequest::new("   "), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SynthesisError::Validation(ValidationError::EmptyText)));
        assert_eq!(primary.calls() + secondary.calls(), 0);
        assert!(analytics.records().is_empty());
    }

    #[test]
    fn set_provider_rejects_unknown_names() {
        let (orch, _) = orchestrator(FakeProvider::silent("primary"), FakeProvider::silent("secondary"));
        assert!(orch.set_provider("elsewhere").is_err());
        assert_eq!(orch.current_provider(), ProviderKind::Primary);
        assert_eq!(orch.set_provider("Secondary").unwrap(), ProviderKind::Secondary);

        let health = orch.health();
        assert_eq!(health.current_provider, ProviderKind::Secondary);
        assert_eq!(health.primary["name"], "primary");
    }
}
