use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use super::types::TextToSpeechBody;
use super::{Artifact, SpeechProvider, SynthesisRequest};
use crate::error::{AttemptError, TransportError};

const API_URL: &str = "https://api.elevenlabs.io";

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_voice: String,
    pub model_id: String,
    pub sample_rate: u32,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            base_url: API_URL.to_string(),
            api_key: String::new(),
            default_voice: "default".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            sample_rate: 24_000,
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
        }
    }
}

/// The secondary provider: one synchronous HTTP call per attempt, no
/// internal retries.
pub struct HttpProvider {
    name: String,
    config: HttpProviderConfig,
    client: Client,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            name: "secondary".to_string(),
            config,
            client,
        })
    }

    fn url(&self, voice: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{voice}",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl SpeechProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Artifact, AttemptError> {
        if self.config.api_key.is_empty() {
            return Err(AttemptError::rejected(&self.name, "API key not configured"));
        }

        let voice = request
            .voice
            .voice_id
            .as_deref()
            .unwrap_or(&self.config.default_voice);
        let body = TextToSpeechBody {
            text: request.text.clone(),
            model_id: self.config.model_id.clone(),
            seed: request.voice.seed,
        };

        let response = self
            .client
            .post(self.url(voice))
            .query(&[("output_format", format!("pcm_{}", self.config.sample_rate))])
            .header("xi-api-key", &self.config.api_key)
            .header("accept", "audio/pcm")
            .json(&body)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            warn!(provider = %self.name, status = status.as_u16(), "request rejected");
            return Err(AttemptError::rejected(
                &self.name,
                format!("status {}: {message}", status.as_u16()),
            ));
        }

        let pcm = response.bytes().await.map_err(TransportError::from)?;
        if pcm.is_empty() {
            return Err(AttemptError::rejected(&self.name, "empty audio response"));
        }
        info!(provider = %self.name, bytes = pcm.len(), "audio generation completed");
        Ok(Artifact::from_pcm(&pcm, request.format, self.config.sample_rate))
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "status": if self.config.api_key.is_empty() { "not_configured" } else { "configured" },
            "base_url": self.config.base_url,
            "model_id": self.config.model_id,
        })
    }
}
