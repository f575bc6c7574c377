//! Networked embedding backend talking to an Ollama daemon.
//!
//! Calls block on the caller's thread. Each request carries its own
//! timeout; failures are retried with a linearly growing delay until the
//! attempt budget is spent.
//!
//! HTTP clients are built on first use. A blocking client owns a runtime
//! thread, so an engine that never talks to the daemon never starts one
//! and can be built inside an async runtime.

use super::EmbeddingProvider;
use crate::LoomError;
use crate::config::OllamaConfig;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

pub const OLLAMA_PROVIDER_NAME: &str = "ollama";

/// Embedding models known to work with `/api/embeddings`.
const KNOWN_MODELS: [&str; 3] = ["nomic-embed-text", "mxbai-embed-large", "all-minilm"];

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Ollama-backed embedding provider.
pub struct OllamaEmbeddingProvider {
    client: OnceLock<Result<Client, String>>,
    status_client: OnceLock<Result<Client, String>>,
    config: OllamaConfig,
    /// Models confirmed present (or pulled) on the daemon.
    present: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for OllamaEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbeddingProvider")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl OllamaEmbeddingProvider {
    #[must_use]
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: OnceLock::new(),
            status_client: OnceLock::new(),
            config,
            present: Mutex::new(BTreeSet::new()),
        }
    }

    /// Client for embedding and pull requests.
    fn client(&self) -> Result<&Client, String> {
        lazy_client(&self.client, self.config.timeout_ms)
    }

    /// Short-timeout client for availability checks and model listing.
    fn status_client(&self) -> Result<&Client, String> {
        lazy_client(&self.status_client, self.config.availability_timeout_ms)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn supports(&self, model: &str) -> bool {
        model == self.config.model || KNOWN_MODELS.contains(&model)
    }

    fn request_embedding(&self, text: &str, model: &str) -> Result<Vec<f32>, String> {
        let response = self
            .client()?
            .post(self.url("/api/embeddings"))
            .json(&EmbeddingRequest {
                model,
                prompt: text,
            })
            .send()
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(format!("HTTP {status}: {body}"));
        }

        let parsed: EmbeddingResponse = response.json().map_err(|e| e.to_string())?;
        if parsed.embedding.is_empty() {
            return Err("daemon returned an empty embedding".to_string());
        }
        Ok(parsed.embedding)
    }

    fn list_models(&self) -> Result<Vec<String>, String> {
        let response = self
            .status_client()?
            .get(self.url("/api/tags"))
            .send()
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let tags: TagsResponse = response.json().map_err(|e| e.to_string())?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Best effort: pull `model` if the daemon does not list it.
    /// Failures are logged and otherwise ignored.
    fn ensure_model(&self, model: &str) {
        let mut present = self
            .present
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if present.contains(model) {
            return;
        }

        let listed = match self.list_models() {
            Ok(names) => names
                .iter()
                .any(|n| n == model || n.strip_prefix(model).is_some_and(|r| r.starts_with(':'))),
            Err(e) => {
                tracing::debug!(model, error = %e, "could not list ollama models");
                return;
            }
        };
        if listed {
            present.insert(model.to_string());
            return;
        }

        tracing::info!(model, "pulling missing ollama model");
        let pulled = self
            .client()
            .and_then(|client| {
                client
                    .post(self.url("/api/pull"))
                    .json(&PullRequest {
                        name: model,
                        stream: false,
                    })
                    .send()
                    .map_err(|e| e.to_string())
            })
            .and_then(|r| {
                if r.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("HTTP {}", r.status()))
                }
            });
        match pulled {
            Ok(()) => {
                present.insert(model.to_string());
            }
            Err(e) => tracing::warn!(model, error = %e, "ollama model pull failed"),
        }
    }
}

fn lazy_client(
    cell: &OnceLock<Result<Client, String>>,
    timeout_ms: u64,
) -> Result<&Client, String> {
    cell.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| format!("ollama client: {e}"))
    })
    .as_ref()
    .map_err(Clone::clone)
}

impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn name(&self) -> &str {
        OLLAMA_PROVIDER_NAME
    }

    fn generate_embedding(&self, text: &str, model: &str) -> Result<Vec<f32>, LoomError> {
        if !self.supports(model) {
            return Err(LoomError::UnsupportedModel {
                provider: OLLAMA_PROVIDER_NAME.to_string(),
                model: model.to_string(),
            });
        }
        if self.config.auto_pull {
            self.ensure_model(model);
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.request_embedding(text, model) {
                Ok(embedding) => return Ok(embedding),
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, model, error = %e, "ollama embedding attempt failed");
                    last_error = e;
                }
            }
            if attempt < max_attempts {
                let delay = self
                    .config
                    .retry_base_delay_ms
                    .saturating_mul(u64::from(attempt));
                std::thread::sleep(Duration::from_millis(delay));
            }
        }

        Err(LoomError::EmbeddingFailed {
            provider: OLLAMA_PROVIDER_NAME.to_string(),
            attempts: max_attempts,
            reason: last_error,
        })
    }

    fn is_available(&self) -> Result<bool, LoomError> {
        let response = self
            .status_client()
            .map_err(|e| LoomError::ProviderUnavailable(format!("ollama: {e}")))?
            .get(self.url("/api/tags"))
            .send()
            .map_err(|e| LoomError::ProviderUnavailable(format!("ollama: {e}")))?;
        Ok(response.status().is_success())
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn supported_models(&self) -> Vec<String> {
        let mut models: Vec<String> = KNOWN_MODELS.iter().map(|m| (*m).to_string()).collect();
        if !models.contains(&self.config.model) {
            models.push(self.config.model.clone());
        }
        models
    }
}
