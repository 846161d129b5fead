//! Configuration
//!
//! [`AskConfig`] is built once at process start and shared by reference with
//! the relay, the worker and every session.
//!
//! # Configuration Priority
//!
//! Values are layered with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! The file lives at `$XDG_CONFIG_HOME/askcode/config.toml`.
//!
//! # Example Configuration
//!
//! ```toml
//! [ollama]
//! url = "http://localhost:11434"
//! model = "qwen2.5-coder:14b"
//! endpoint = "chat"
//! timeout_secs = 180
//! keep_alive = "10m"
//!
//! [generation]
//! temperature = 0.2
//! num_ctx = 8192
//!
//! [ui]
//! poll_interval_ms = 100
//! render_interval_ms = 80
//! channel_capacity = 256
//!
//! [ipc]
//! socket_path = "/run/user/1000/askcode/askcode.sock"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default Ollama server address
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Default model when nothing else is configured
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:14b";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Endpoint
// =============================================================================

/// Which Ollama streaming endpoint a turn is sent to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// `/api/chat` with a structured `messages` array
    #[default]
    Chat,
    /// `/api/generate` with a linearised `prompt`
    Generate,
}

impl Endpoint {
    /// Path below the server base URL
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Chat => "/api/chat",
            Endpoint::Generate => "/api/generate",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "chat" => Some(Endpoint::Chat),
            "generate" => Some(Endpoint::Generate),
            _ => None,
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[ollama]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaToml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<Endpoint>,
    pub timeout_secs: Option<u64>,
    pub keep_alive: Option<String>,
}

/// `[generation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    pub temperature: Option<f32>,
    pub num_ctx: Option<u32>,
}

/// `[ui]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiToml {
    pub poll_interval_ms: Option<u64>,
    pub render_interval_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
}

/// `[ipc]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcToml {
    pub socket_path: Option<PathBuf>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub ollama: OllamaToml,
    pub generation: GenerationToml,
    pub ui: UiToml,
    pub ipc: IpcToml,
}

/// Values supplied on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<Endpoint>,
    pub socket_path: Option<PathBuf>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Process-wide runtime configuration
#[derive(Clone, Debug, PartialEq)]
pub struct AskConfig {
    /// Base URL of the Ollama server, without a trailing slash
    pub ollama_url: String,
    /// Model used when a turn does not name one
    ///
    /// `None` means the CLI asks the server at startup.
    pub default_model: Option<String>,
    /// Streaming endpoint
    pub endpoint: Endpoint,
    /// Sampling temperature, forwarded verbatim in `options`
    pub temperature: f32,
    /// Context window, forwarded verbatim in `options`
    pub num_ctx: u32,
    /// How long the server keeps the model loaded between requests
    pub keep_alive: String,
    /// Whole-request timeout for streaming calls
    pub request_timeout: Duration,
    /// How long the worker waits on the fragment channel before re-checking cancellation
    pub poll_interval: Duration,
    /// Render coalescing interval
    pub render_interval: Duration,
    /// Capacity of the relay -> worker channel
    pub channel_capacity: usize,
    /// Hand-off socket (None = default path)
    pub socket_path: Option<PathBuf>,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            default_model: Some(DEFAULT_MODEL.to_string()),
            endpoint: Endpoint::Chat,
            temperature: 0.2,
            num_ctx: 8192,
            keep_alive: "10m".to_string(),
            request_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_millis(100),
            render_interval: Duration::from_millis(80),
            channel_capacity: 256,
            socket_path: None,
        }
    }
}

impl AskConfig {
    /// Load from the default file location, the process environment and CLI overrides
    ///
    /// `explicit_path` must exist when given; the default file is optional.
    pub fn load(
        explicit_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match explicit_path {
            Some(path) => config.apply_file(&load_config_from_path(path)?),
            None => {
                if let Some(path) = default_config_path().filter(|p| p.exists()) {
                    tracing::debug!(path = ?path, "Loading config file");
                    config.apply_file(&load_config_from_path(&path)?);
                }
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Layer values from a parsed config file
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(ref url) = file.ollama.url {
            self.ollama_url = normalize_url(url);
        }
        if let Some(ref model) = file.ollama.model {
            self.default_model = non_empty(model);
        }
        if let Some(endpoint) = file.ollama.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(secs) = file.ollama.timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ref keep_alive) = file.ollama.keep_alive {
            self.keep_alive = keep_alive.clone();
        }
        if let Some(temperature) = file.generation.temperature {
            self.temperature = clamp_temperature(temperature);
        }
        if let Some(num_ctx) = file.generation.num_ctx {
            self.num_ctx = num_ctx;
        }
        if let Some(ms) = file.ui.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.ui.render_interval_ms {
            self.render_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = file.ui.channel_capacity {
            self.channel_capacity = capacity;
        }
        if let Some(ref path) = file.ipc.socket_path {
            self.socket_path = Some(path.clone());
        }
    }

    /// Layer values from environment variables
    ///
    /// Environment variables:
    /// - `OLLAMA_HOST`: `host`, `host:port` or a full URL
    /// - `ASKCODE_MODEL`: default model (empty = none)
    /// - `ASKCODE_ENDPOINT`: "chat" or "generate"
    /// - `ASKCODE_TEMPERATURE`: sampling temperature
    /// - `ASKCODE_NUM_CTX`: context window
    /// - `ASKCODE_KEEP_ALIVE`: e.g. "10m"
    /// - `ASKCODE_SOCKET`: hand-off socket path
    ///
    /// Unparseable values are logged and skipped.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
            self.ollama_url = url_from_host(&host);
        }
        if let Some(model) = lookup("ASKCODE_MODEL") {
            self.default_model = non_empty(&model);
        }
        if let Some(raw) = lookup("ASKCODE_ENDPOINT") {
            match Endpoint::parse(&raw) {
                Some(endpoint) => self.endpoint = endpoint,
                None => tracing::warn!(value = %raw, "Ignoring invalid ASKCODE_ENDPOINT"),
            }
        }
        if let Some(raw) = lookup("ASKCODE_TEMPERATURE") {
            match raw.trim().parse::<f32>() {
                Ok(t) => self.temperature = clamp_temperature(t),
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid ASKCODE_TEMPERATURE"),
            }
        }
        if let Some(raw) = lookup("ASKCODE_NUM_CTX") {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.num_ctx = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid ASKCODE_NUM_CTX"),
            }
        }
        if let Some(keep_alive) = lookup("ASKCODE_KEEP_ALIVE").filter(|k| !k.is_empty()) {
            self.keep_alive = keep_alive;
        }
        if let Some(path) = lookup("ASKCODE_SOCKET").filter(|p| !p.is_empty()) {
            self.socket_path = Some(PathBuf::from(path));
        }
    }

    /// Layer values from the command line
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref url) = overrides.url {
            self.ollama_url = normalize_url(url);
        }
        if let Some(ref model) = overrides.model {
            self.default_model = non_empty(model);
        }
        if let Some(endpoint) = overrides.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(ref path) = overrides.socket_path {
            self.socket_path = Some(path.clone());
        }
    }

    /// Check the resolved values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ollama_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "Ollama URL must not be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() || self.render_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll and render intervals must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the model for a turn: explicit override first, then the default
    #[must_use]
    pub fn resolve_model(&self, requested: Option<&str>) -> Option<String> {
        requested
            .and_then(non_empty)
            .or_else(|| self.default_model.as_deref().and_then(non_empty))
    }
}

/// Read and parse a TOML configuration file
pub fn load_config_from_path(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// `$XDG_CONFIG_HOME/askcode/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("askcode").join("config.toml"))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn clamp_temperature(t: f32) -> f32 {
    t.clamp(0.0, 2.0)
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// `OLLAMA_HOST` accepts the same shapes the Ollama CLI does
fn url_from_host(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        normalize_url(host)
    } else if host.contains(':') {
        normalize_url(&format!("http://{host}"))
    } else {
        format!("http://{host}:11434")
    }
}
