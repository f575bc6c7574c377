//! # Engine Configuration
//!
//! `EngineConfig` is read from TOML (every field defaulted) and can be
//! adjusted from the environment:
//!
//! | variable | effect |
//! | --- | --- |
//! | `GRAPHLOOM_DB_PATH` | durable store path |
//! | `GRAPHLOOM_EMBEDDING_PROVIDER` | configured embedding provider |
//! | `GRAPHLOOM_OLLAMA_URL` | Ollama base URL |
//! | `GRAPHLOOM_OLLAMA_MODEL` | Ollama model |
//! | `GRAPHLOOM_ENV=test` | hermetic embeddings |

use crate::LoomError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "GRAPHLOOM_DB_PATH";
pub const ENV_EMBEDDING_PROVIDER: &str = "GRAPHLOOM_EMBEDDING_PROVIDER";
pub const ENV_OLLAMA_URL: &str = "GRAPHLOOM_OLLAMA_URL";
pub const ENV_OLLAMA_MODEL: &str = "GRAPHLOOM_OLLAMA_MODEL";
pub const ENV_MODE: &str = "GRAPHLOOM_ENV";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Durable store file. `None` selects the in-memory backend.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Configured provider name (`simple` or `ollama`).
    pub provider: Option<String>,
    /// Force the deterministic backend unless a caller names a provider.
    /// Unset means "only inside this crate's unit tests".
    pub hermetic: Option<bool>,
    pub ollama: OllamaConfig,
}

impl EmbeddingConfig {
    #[must_use]
    pub fn is_hermetic(&self) -> bool {
        self.hermetic.unwrap_or(cfg!(test))
    }
}

/// Settings for the Ollama embedding daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Per-request timeout for embedding calls.
    pub timeout_ms: u64,
    /// Timeout for the availability check.
    pub availability_timeout_ms: u64,
    pub max_attempts: u32,
    /// Attempt `n` waits `n * retry_base_delay_ms` before retrying.
    pub retry_base_delay_ms: u64,
    /// Try to pull a missing model before the first attempt.
    pub auto_pull: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            timeout_ms: 30_000,
            availability_timeout_ms: 2_000,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            auto_pull: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing sections and keys take defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, LoomError> {
        toml::from_str(contents).map_err(|e| LoomError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoomError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LoomError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Configuration for an in-memory engine with deterministic embeddings.
    #[must_use]
    pub fn hermetic() -> Self {
        let mut config = Self::default();
        config.embedding.hermetic = Some(true);
        config
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    #[must_use]
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_DB_PATH) {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(provider) = get(ENV_EMBEDDING_PROVIDER) {
            self.embedding.provider = Some(provider);
        }
        if let Some(url) = get(ENV_OLLAMA_URL) {
            self.embedding.ollama.base_url = url;
        }
        if let Some(model) = get(ENV_OLLAMA_MODEL) {
            self.embedding.ollama.model = model;
        }
        if get(ENV_MODE).is_some_and(|mode| mode.eq_ignore_ascii_case("test")) {
            self.embedding.hermetic = Some(true);
        }
        self
    }
}
