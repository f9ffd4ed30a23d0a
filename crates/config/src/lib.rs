//! Configuration loading and validation for Parley.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides for secrets. All settings are validated at startup;
//! degenerate chunking parameters are rejected here before any
//! document processing can run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Model provider settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Retrieval and chunking settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("retrieval", &self.retrieval)
            .field("storage", &self.storage)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API key for the model provider. `PARLEY_API_KEY` overrides this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model identifier
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Maximum context window of the configured model, in tokens
    #[serde(default = "default_max_model_tokens")]
    pub max_model_tokens: usize,

    /// Fraction of the context window the backend is willing to use,
    /// leaving headroom for the reply
    #[serde(default = "default_safety_fraction")]
    pub safety_fraction: f64,

    /// System instructions prepended to every model call
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model_name() -> String {
    "llama-3.1-8b-instant".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_max_model_tokens() -> usize {
    32768
}
fn default_safety_fraction() -> f64 {
    0.8
}
fn default_system_prompt() -> String {
    "You are a helpful and concise enterprise conversational assistant. \
     Your goal is to answer user queries based on conversation history and \
     provided documents. Be professional and brief."
        .into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            name: default_model_name(),
            embedding_model: default_embedding_model(),
            max_model_tokens: default_max_model_tokens(),
            safety_fraction: default_safety_fraction(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl ModelConfig {
    /// The working token budget: `floor(max_model_tokens * safety_fraction)`.
    ///
    /// For the default 32768-token model this is 26214 tokens.
    pub fn context_budget(&self) -> usize {
        (self.max_model_tokens as f64 * self.safety_fraction) as usize
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("name", &self.name)
            .field("embedding_model", &self.embedding_model)
            .field("max_model_tokens", &self.max_model_tokens)
            .field("safety_fraction", &self.safety_fraction)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Fragment width in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive fragments, in characters
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// How many top-scored fragments make up the grounding context
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Days a pre-conversation upload stays eligible for linking
    #[serde(default = "default_pending_upload_ttl_days")]
    pub pending_upload_ttl_days: i64,
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}
fn default_top_k() -> usize {
    5
}
fn default_pending_upload_ttl_days() -> i64 {
    7
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            top_k: default_top_k(),
            pending_upload_ttl_days: default_pending_upload_ttl_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. `:memory:` for ephemeral (tests).
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory where uploaded files are written before extraction
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
}

fn default_db_path() -> String {
    "parley.db".into()
}
fn default_upload_dir() -> String {
    "uploads".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            upload_dir: default_upload_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, apply environment overrides,
    /// and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated. Used when no
    /// config file exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("PARLEY_API_KEY") {
            if !key.is_empty() {
                self.model.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("PARLEY_BASE_URL") {
            if !url.is_empty() {
                self.model.base_url = url;
            }
        }
    }

    /// Validate all settings. Fails fast on degenerate chunking
    /// parameters — an unguarded `overlap >= chunk_size` makes the
    /// chunker advance by zero or backwards.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.retrieval.overlap >= self.retrieval.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.retrieval.overlap, self.retrieval.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".into()));
        }
        if !(0.0 < self.model.safety_fraction && self.model.safety_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "safety_fraction ({}) must be in (0, 1]",
                self.model.safety_fraction
            )));
        }
        if self.model.max_model_tokens == 0 {
            return Err(ConfigError::Invalid(
                "max_model_tokens must be positive".into(),
            ));
        }
        Ok(())
    }
}
