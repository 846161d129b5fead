//! Ollama Backend Implementation
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history (default)
//! - `/api/generate` - Completions for a single linearised prompt
//! - `/api/tags` - List available models
//!
//! Both streaming endpoints answer with newline-delimited JSON. This client
//! only opens the body; decoding happens in the relay.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::traits::{BackendError, ByteStream, StreamRequest, StreamTransport};
use crate::config::{AskConfig, Endpoint};

/// Upper bound on establishing the TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Base URL, e.g. `http://localhost:11434`
    base_url: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// `timeout` bounds connecting and each wait for the next piece of the
    /// response. A reply may stream for longer as long as bytes keep coming.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create from the runtime configuration
    pub fn from_config(config: &AskConfig) -> Result<Self, BackendError> {
        Self::new(config.ollama_url.clone(), config.request_timeout)
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// Check if the server is reachable
    pub async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    /// List the models the server has pulled
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let data: serde_json::Value = response.json().await?;
        Ok(parse_model_names(&data))
    }

    /// First model the server reports, used when nothing is configured
    pub async fn first_model(&self) -> Result<Option<String>, BackendError> {
        Ok(self.list_models().await?.into_iter().next())
    }

    /// Load a model into memory ahead of the first real request
    ///
    /// Fire-and-forget: failures are logged and otherwise ignored.
    pub fn warm_up(&self, model: &str) {
        if model.is_empty() {
            return;
        }

        let client = self.http_client.clone();
        let url = self.endpoint_url(Endpoint::Generate);
        let body = serde_json::json!({
            "model": model,
            "prompt": "",
            "stream": false,
        });
        let model = model.to_string();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .timeout(Duration::from_secs(30))
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);

            match result {
                Ok(_) => tracing::debug!(model = %model, "Model warmed up"),
                Err(e) => tracing::debug!(model = %model, error = %e, "Warm-up request failed"),
            }
        });
    }
}

#[async_trait]
impl StreamTransport for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, BackendError> {
        let url = self.endpoint_url(request.endpoint());
        tracing::debug!(url = %url, model = %request.model, "Opening stream");

        let response = self.http_client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(BackendError::from))
            .boxed())
    }
}

/// Extract model names from an `/api/tags` response
fn parse_model_names(data: &serde_json::Value) -> Vec<String> {
    data.get("models")
        .and_then(|m| m.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.get("name")?.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_urls() {
        let backend = OllamaBackend::new("http://localhost:11434/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(
            backend.endpoint_url(Endpoint::Chat),
            "http://localhost:11434/api/chat"
        );
        assert_eq!(
            backend.endpoint_url(Endpoint::Generate),
            "http://localhost:11434/api/generate"
        );
        assert_eq!(backend.tags_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn test_from_config() {
        let config = AskConfig {
            ollama_url: "http://gpu-box:9000".to_string(),
            ..Default::default()
        };
        let backend = OllamaBackend::from_config(&config).unwrap();
        assert_eq!(backend.base_url(), "http://gpu-box:9000");
        assert_eq!(backend.name(), "Ollama");
    }

    #[test]
    fn test_parse_model_names() {
        let data = serde_json::json!({
            "models": [
                {"name": "qwen2.5-coder:14b", "size": 9000000000u64},
                {"size": 1},
                {"name": "llama3.2:latest"}
            ]
        });
        assert_eq!(
            parse_model_names(&data),
            vec!["qwen2.5-coder:14b".to_string(), "llama3.2:latest".to_string()]
        );
        assert!(parse_model_names(&serde_json::json!({})).is_empty());
    }
}
