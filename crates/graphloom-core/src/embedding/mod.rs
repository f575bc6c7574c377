//! # Embedding Service
//!
//! Text-to-vector backends behind one capability trait, plus the registry
//! that picks one per call.
//!
//! The set of backends is closed (`ProviderKind`). The registry is an
//! ordinary value owned by whoever builds the engine; it caches the last
//! provider it resolved so repeated calls skip the availability check.

pub mod ollama;
pub mod simple;

pub use ollama::OllamaEmbeddingProvider;
pub use simple::SimpleEmbeddingProvider;

use crate::config::EmbeddingConfig;
use crate::{LoomError, NodeEmbedding, NodeRecord, PropertyValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

// =============================================================================
// PROVIDER TRAIT
// =============================================================================

/// Capability interface every embedding backend implements.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Embed `text` with `model`. Unknown models fail with
    /// `LoomError::UnsupportedModel`.
    fn generate_embedding(&self, text: &str, model: &str) -> Result<Vec<f32>, LoomError>;

    /// Check the backend. An `Err` counts as unavailable.
    fn is_available(&self) -> Result<bool, LoomError>;

    fn default_model(&self) -> &str;

    fn supported_models(&self) -> Vec<String>;
}

/// The closed set of embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic local fallback. Never unavailable.
    Simple,
    /// Ollama daemon over HTTP.
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Ollama, ProviderKind::Simple];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => simple::SIMPLE_PROVIDER_NAME,
            Self::Ollama => ollama::OLLAMA_PROVIDER_NAME,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "local" => Ok(Self::Simple),
            "ollama" => Ok(Self::Ollama),
            other => Err(LoomError::MalformedInput(format!(
                "unknown embedding provider '{other}', expected simple or ollama"
            ))),
        }
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Output of one embedding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub model: String,
    pub provider: String,
    pub dimensions: usize,
}

impl EmbeddingResult {
    /// Stamp the result for storage against a node.
    #[must_use]
    pub fn into_node_embedding(self) -> NodeEmbedding {
        NodeEmbedding {
            model: self.model,
            provider: self.provider,
            vector: self.embedding,
            created_at: Utc::now(),
        }
    }
}

/// Provider description for front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub available: bool,
    pub default_model: String,
    pub supported_models: Vec<String>,
    /// True for the provider the registry last resolved.
    pub current: bool,
}

/// Text embedded for a node: label, type, then string and number
/// property values, space separated.
pub fn node_text(node: &impl NodeRecord) -> String {
    let mut parts: Vec<String> = vec![node.label().to_string(), node.node_type().to_string()];
    for value in node.properties().values() {
        match value {
            PropertyValue::String(s) => parts.push(s.clone()),
            PropertyValue::Int(i) => parts.push(i.to_string()),
            PropertyValue::Float(f) => parts.push(f.to_string()),
            _ => {}
        }
    }
    parts.retain(|p| !p.trim().is_empty());
    parts.join(" ")
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Provider registry with a cached current provider.
///
/// Resolution order for a call:
/// 1. Hermetic mode with no preferred provider: the deterministic backend.
/// 2. A cached provider, when none is preferred or the preferred one is it.
/// 3. The first available of preferred, configured, Ollama, deterministic.
/// 4. The deterministic backend, unconditionally.
#[derive(Debug)]
pub struct EmbeddingService {
    simple: SimpleEmbeddingProvider,
    ollama: OllamaEmbeddingProvider,
    configured: Option<ProviderKind>,
    hermetic: bool,
    current: Mutex<Option<ProviderKind>>,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, LoomError> {
        let configured = config
            .provider
            .as_deref()
            .map(|name| {
                name.parse::<ProviderKind>()
                    .map_err(|e| LoomError::Config(e.to_string()))
            })
            .transpose()?;

        Ok(Self {
            simple: SimpleEmbeddingProvider::new(),
            ollama: OllamaEmbeddingProvider::new(config.ollama.clone()),
            configured,
            hermetic: config.is_hermetic(),
            current: Mutex::new(None),
        })
    }

    /// Borrow a backend by kind.
    #[must_use]
    pub fn provider(&self, kind: ProviderKind) -> &dyn EmbeddingProvider {
        match kind {
            ProviderKind::Simple => &self.simple,
            ProviderKind::Ollama => &self.ollama,
        }
    }

    /// The provider resolved most recently, if any.
    #[must_use]
    pub fn current(&self) -> Option<ProviderKind> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current(&self, kind: ProviderKind) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    fn check(&self, kind: ProviderKind) -> bool {
        match self.provider(kind).is_available() {
            Ok(available) => available,
            Err(e) => {
                tracing::warn!(provider = %kind, error = %e, "embedding provider availability check failed");
                false
            }
        }
    }

    /// Pick the provider for a call. Never fails.
    pub fn resolve(&self, preferred: Option<ProviderKind>) -> ProviderKind {
        if self.hermetic && preferred.is_none() {
            self.set_current(ProviderKind::Simple);
            return ProviderKind::Simple;
        }

        if let Some(cached) = self
            .current()
            .filter(|cached| preferred.is_none_or(|p| p == *cached))
        {
            return cached;
        }

        let mut candidates: Vec<ProviderKind> = Vec::with_capacity(4);
        for kind in [preferred, self.configured, Some(ProviderKind::Ollama)]
            .into_iter()
            .flatten()
            .chain(std::iter::once(ProviderKind::Simple))
        {
            if !candidates.contains(&kind) {
                candidates.push(kind);
            }
        }

        let chosen = candidates
            .into_iter()
            .find(|kind| self.check(*kind))
            .unwrap_or(ProviderKind::Simple);

        tracing::info!(provider = %chosen, ?preferred, "embedding provider selected");
        self.set_current(chosen);
        chosen
    }

    /// Embed `text`. `model` defaults to the resolved provider's default.
    pub fn generate(
        &self,
        text: &str,
        preferred: Option<ProviderKind>,
        model: Option<&str>,
    ) -> Result<EmbeddingResult, LoomError> {
        let kind = self.resolve(preferred);
        let provider = self.provider(kind);
        let model = model.unwrap_or_else(|| provider.default_model()).to_string();

        let embedding = provider.generate_embedding(text, &model)?;
        tracing::debug!(provider = %kind, model = %model, dimensions = embedding.len(), "embedding generated");

        Ok(EmbeddingResult {
            dimensions: embedding.len(),
            embedding,
            model,
            provider: kind.as_str().to_string(),
        })
    }

    /// Describe every backend. In hermetic mode networked backends are
    /// reported unavailable without being contacted.
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        let current = self.current();
        ProviderKind::ALL
            .into_iter()
            .map(|kind| {
                let provider = self.provider(kind);
                let available = match kind {
                    ProviderKind::Simple => true,
                    ProviderKind::Ollama if self.hermetic => false,
                    ProviderKind::Ollama => self.check(kind),
                };
                ProviderInfo {
                    name: kind.as_str().to_string(),
                    available,
                    default_model: provider.default_model().to_string(),
                    supported_models: provider.supported_models(),
                    current: current == Some(kind),
                }
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewNode;
    use crate::config::OllamaConfig;

    fn hermetic_service() -> EmbeddingService {
        EmbeddingService::new(&EmbeddingConfig {
            hermetic: Some(true),
            ..EmbeddingConfig::default()
        })
        .expect("service")
    }

    /// Non-hermetic registry whose Ollama backend can never connect.
    fn offline_service(provider: Option<&str>) -> EmbeddingService {
        EmbeddingService::new(&EmbeddingConfig {
            provider: provider.map(str::to_string),
            hermetic: Some(false),
            ollama: OllamaConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                availability_timeout_ms: 200,
                ..OllamaConfig::default()
            },
        })
        .expect("service")
    }

    #[test]
    fn hermetic_mode_forces_simple() {
        let service = hermetic_service();
        let result = service.generate("Login form", None, None).expect("embed");
        assert_eq!(result.provider, "simple");
        assert_eq!(result.model, "simple-v1");
        assert_eq!(result.dimensions, result.embedding.len());
    }

    #[test]
    fn unavailable_providers_fall_back_to_simple() {
        let service = offline_service(Some("ollama"));
        assert_eq!(service.resolve(None), ProviderKind::Simple);
        assert_eq!(service.current(), Some(ProviderKind::Simple));
    }

    #[test]
    fn cached_provider_is_reused() {
        let service = offline_service(None);
        assert_eq!(service.resolve(Some(ProviderKind::Simple)), ProviderKind::Simple);
        assert_eq!(service.resolve(None), ProviderKind::Simple);
        assert_eq!(service.resolve(Some(ProviderKind::Simple)), ProviderKind::Simple);
    }

    #[test]
    fn unsupported_model_names_the_model() {
        let service = hermetic_service();
        let err = service
            .generate("text", None, Some("text-embedding-3"))
            .expect_err("unsupported");
        assert!(err.to_string().contains("text-embedding-3"));
    }

    #[test]
    fn unknown_configured_provider_is_a_config_error() {
        let result = EmbeddingService::new(&EmbeddingConfig {
            provider: Some("openai".into()),
            ..EmbeddingConfig::default()
        });
        assert!(matches!(result, Err(LoomError::Config(_))));
    }

    #[test]
    fn provider_info_lists_both_backends() {
        let service = hermetic_service();
        service
            .generate("warm the cache", Some(ProviderKind::Simple), None)
            .expect("embed");

        let info = service.provider_info();
        assert_eq!(info.len(), 2);
        let simple = info.iter().find(|p| p.name == "simple").expect("simple");
        assert!(simple.available);
        assert!(simple.current);
        let ollama = info.iter().find(|p| p.name == "ollama").expect("ollama");
        assert!(!ollama.available);
        assert_eq!(ollama.default_model, "nomic-embed-text");
    }

    #[test]
    fn provider_kind_parses_names() {
        assert_eq!("Ollama".parse::<ProviderKind>().expect("parse"), ProviderKind::Ollama);
        assert_eq!("local".parse::<ProviderKind>().expect("parse"), ProviderKind::Simple);
        assert!("openai".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn node_text_joins_label_type_and_scalar_properties() {
        let node = NewNode::new("Component", "Login")
            .with_property("route", "/login")
            .with_property("port", 8080i64)
            .with_property("enabled", true);
        assert_eq!(node_text(&node), "Login Component 8080 /login");
    }
}
