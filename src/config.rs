//! Configuração do voxqueue carregada a partir de `voxqueue.toml`.
//!
//! A struct [`Config`] agrupa as seções de fila, cache, provedores, limites,
//! analytics e upload. Valores ausentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente têm precedência sobre o arquivo.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::error::AppError;
use crate::limits::Limits;
use crate::orchestrator::OrchestratorConfig;
use crate::provider::{HttpProviderConfig, ProviderKind, StreamingConfig};
use crate::queue::QueueConfig;
use crate::worker::WorkerConfig;

/// Arquivo procurado no diretório atual quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "voxqueue.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueSection,
    pub cache: CacheSection,
    pub provider: ProviderSection,
    pub primary: PrimarySection,
    pub secondary: SecondarySection,
    pub limits: Limits,
    pub analytics: AnalyticsSection,
    pub upload: UploadSection,
}

/// Parâmetros da fila de jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Retentativas por job antes da dead-letter queue.
    pub max_retries: u32,
    /// Máximo de jobs em processamento simultâneo.
    pub max_concurrent: usize,
    pub timeout_seconds: u64,
    /// Dias que jobs finalizados ficam disponíveis antes da limpeza.
    pub retention_days: u32,
    /// Se falhas em todos os provedores consomem retentativas da fila.
    pub retry_after_failover: bool,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_concurrent: 5,
            timeout_seconds: 300,
            retention_days: 7,
            retry_after_failover: true,
        }
    }
}

/// Parâmetros do cache de resultados.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    /// Diretório dos arquivos. Sem diretório, o cache fica em memória.
    pub dir: Option<PathBuf>,
    pub max_size_mb: u64,
    pub ttl_hours: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_size_mb: 500,
            ttl_hours: 168,
        }
    }
}

/// Seleção de provedor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Provedor inicial: `primary` ou `secondary`.
    pub default: String,
    /// Usa provedores simulados em vez dos reais.
    pub mock: bool,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            default: "primary".to_string(),
            mock: false,
        }
    }
}

/// Provedor primário (WebSocket).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrimarySection {
    pub endpoint: Option<String>,
    pub connection_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub sample_rate: u32,
    pub voice_id: String,
}

impl Default for PrimarySection {
    fn default() -> Self {
        Self {
            endpoint: None,
            connection_timeout_secs: 10,
            chunk_timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 2000,
            sample_rate: 24_000,
            voice_id: "default".to_string(),
        }
    }
}

/// Provedor secundário (HTTP).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecondarySection {
    pub api_key: String,
    pub base_url: String,
    pub voice_id: String,
    pub model_id: String,
}

impl Default for SecondarySection {
    fn default() -> Self {
        let http = HttpProviderConfig::default();
        Self {
            api_key: http.api_key,
            base_url: http.base_url,
            voice_id: http.default_voice,
            model_id: http.model_id,
        }
    }
}

/// Registro de métricas de geração.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsSection {
    pub enabled: bool,
    /// Diretório dos arquivos JSONL. Sem diretório, os registros ficam em memória.
    pub path: Option<PathBuf>,
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Destino dos áudios finalizados.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub dir: PathBuf,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    /// Carrega a configuração de `path`, ou de `voxqueue.toml` se existir,
    /// e aplica as variáveis de ambiente por cima.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Sobrescreve campos com as variáveis presentes em `lookup`.
    ///
    /// A busca é injetada para que os testes não precisem alterar o ambiente
    /// do processo.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), AppError> {
        let env = Env(lookup);

        env.parse("JOB_MAX_RETRIES", &mut self.queue.max_retries)?;
        env.parse("JOB_MAX_CONCURRENT", &mut self.queue.max_concurrent)?;
        env.parse("JOB_TIMEOUT_SECONDS", &mut self.queue.timeout_seconds)?;
        env.parse("JOB_RETENTION_DAYS", &mut self.queue.retention_days)?;
        env.flag("JOB_RETRY_AFTER_FAILOVER", &mut self.queue.retry_after_failover)?;

        env.flag("CACHE_ENABLED", &mut self.cache.enabled)?;
        env.path("CACHE_DIR", &mut self.cache.dir);
        env.parse("CACHE_MAX_SIZE_MB", &mut self.cache.max_size_mb)?;
        env.parse("CACHE_TTL_HOURS", &mut self.cache.ttl_hours)?;

        env.string("TTS_PROVIDER", &mut self.provider.default);
        env.flag("MOCK_MODE", &mut self.provider.mock)?;

        if let Some(endpoint) = env.get("PRIMARY_WS_ENDPOINT") {
            self.primary.endpoint = Some(endpoint);
        }
        env.parse("PRIMARY_CONNECTION_TIMEOUT", &mut self.primary.connection_timeout_secs)?;
        env.parse("PRIMARY_CHUNK_TIMEOUT", &mut self.primary.chunk_timeout_secs)?;
        env.parse("PRIMARY_MAX_RETRIES", &mut self.primary.max_retries)?;
        env.parse("PRIMARY_RETRY_DELAY_MS", &mut self.primary.retry_delay_ms)?;
        env.parse("PRIMARY_SAMPLE_RATE", &mut self.primary.sample_rate)?;
        env.string("PRIMARY_VOICE_ID", &mut self.primary.voice_id);

        env.string("SECONDARY_API_KEY", &mut self.secondary.api_key);
        env.string("SECONDARY_BASE_URL", &mut self.secondary.base_url);
        env.string("SECONDARY_VOICE_ID", &mut self.secondary.voice_id);
        env.string("SECONDARY_MODEL_ID", &mut self.secondary.model_id);

        env.parse("TTS_MAX_INPUT_CHARS", &mut self.limits.max_input_chars)?;
        env.parse("TTS_MIN_INPUT_CHARS", &mut self.limits.min_input_chars)?;
        env.parse("TTS_MAX_AUDIO_DURATION", &mut self.limits.max_audio_duration_secs)?;
        env.parse("TTS_CHARS_PER_SECOND", &mut self.limits.chars_per_second)?;

        env.flag("TTS_ANALYTICS_ENABLED", &mut self.analytics.enabled)?;
        env.path("TTS_ANALYTICS_PATH", &mut self.analytics.path);

        if let Some(dir) = env.get("UPLOAD_DIR") {
            self.upload.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Provedor inicial validado.
    pub fn default_provider(&self) -> Result<ProviderKind, AppError> {
        Ok(self.provider.default.parse()?)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.queue.max_retries,
            max_concurrent: self.queue.max_concurrent.max(1),
            job_timeout: Duration::from_secs(self.queue.timeout_seconds),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            retry_after_failover: self.queue.retry_after_failover,
            ..Default::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache.enabled,
            dir: self.cache.dir.clone(),
            max_size_bytes: self.cache.max_size_mb.saturating_mul(1024 * 1024),
            ttl: Duration::from_secs(self.cache.ttl_hours.saturating_mul(3600)),
        }
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, AppError> {
        Ok(OrchestratorConfig {
            default_provider: self.default_provider()?,
            primary_max_retries: self.primary.max_retries,
            retry_delay: Duration::from_millis(self.primary.retry_delay_ms),
        })
    }

    pub fn streaming_config(&self) -> StreamingConfig {
        StreamingConfig {
            endpoint: self.primary.endpoint.clone().filter(|e| !e.is_empty()),
            connection_timeout: Duration::from_secs(self.primary.connection_timeout_secs),
            chunk_timeout: Duration::from_secs(self.primary.chunk_timeout_secs),
            sample_rate: self.primary.sample_rate,
            default_voice: self.primary.voice_id.clone(),
        }
    }

    pub fn http_config(&self) -> HttpProviderConfig {
        HttpProviderConfig {
            base_url: self.secondary.base_url.clone(),
            api_key: self.secondary.api_key.clone(),
            default_voice: self.secondary.voice_id.clone(),
            model_id: self.secondary.model_id.clone(),
            sample_rate: self.primary.sample_rate,
            ..Default::default()
        }
    }
}

// Leitura tipada de variáveis de ambiente. Valores vazios são ignorados.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn path(&self, key: &str, target: &mut Option<PathBuf>) {
        if let Some(value) = self.get(key) {
            *target = Some(PathBuf::from(value));
        }
    }

    fn parse<T>(&self, key: &str, target: &mut T) -> Result<(), AppError>
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(value) = self.get(key) {
            *target = value
                .parse()
                .map_err(|err| AppError::Config(format!("{key}={value}: {err}")))?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<(), AppError> {
        if let Some(value) = self.get(key) {
            *target = match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(AppError::Config(format!("{key}={value}: expected a boolean"))),
            };
        }
        Ok(())
    }
}
