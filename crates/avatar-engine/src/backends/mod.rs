//! Uniform capability surface over the supported generation providers.
//!
//! Orchestration (dispatch, cost accounting, analysis fallbacks) is written
//! once against [`Backend`]; each provider only translates the three calls
//! into its own wire format.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use avatar_contracts::pricing::TokenUsage;
use serde_json::{Map, Value};

mod gemini;
pub(crate) mod http;
mod media;
mod openai;

pub use gemini::{GeminiBackend, GeminiSettings};
pub use http::error_chain_text;
pub use openai::{OpenAiBackend, OpenAiSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Already trimmed to the backend's own reference limit.
    pub reference_images: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    /// `None` when the provider does not meter the call.
    pub usage: Option<TokenUsage>,
    /// Provider response metadata for receipts; image payloads excluded.
    pub response: Map<String, Value>,
}

pub trait Backend: Send + Sync {
    /// Stable tag used in artifact names and pricing lookups.
    fn name(&self) -> &str;

    /// How many reference images a single `generate` call accepts.
    fn max_reference_images(&self) -> usize;

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage>;

    /// Vision call: describe `images` following `instruction`.
    fn analyze(&self, instruction: &str, images: &[PathBuf]) -> Result<String>;

    /// Plain text completion.
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Backends keyed by tag, iterated in tag order.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: Backend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Box::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Backend> {
        self.backends.get(name).map(|backend| backend.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Backend> {
        self.backends.values().map(|backend| backend.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

pub fn default_backend_registry(gemini: GeminiSettings, openai: OpenAiSettings) -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    backends.register(GeminiBackend::new(gemini));
    backends.register(OpenAiBackend::new(openai));
    backends
}

#[cfg(test)]
mod tests {
    use super::{default_backend_registry, GeminiSettings, OpenAiSettings};

    #[test]
    fn default_registry_lists_providers_in_tag_order() {
        let registry =
            default_backend_registry(GeminiSettings::default(), OpenAiSettings::default());
        assert_eq!(registry.names(), vec!["gemini", "openai"]);
        assert!(registry.get("gemini").is_some());
        assert!(registry.get("dalle").is_none());
        let order: Vec<&str> = registry.iter().map(|backend| backend.name()).collect();
        assert_eq!(order, vec!["gemini", "openai"]);
    }
}
