use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use avatar_contracts::pricing::TokenUsage;
use serde_json::{json, Map};

use crate::backends::{Backend, GenerateRequest, GeneratedImage};

pub(crate) const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image";

/// In-process backend that counts calls. Clones share their counters, so a
/// test can register one clone and inspect the other.
#[derive(Clone)]
pub(crate) struct FakeBackend {
    name: String,
    reference_limit: usize,
    analysis: Option<String>,
    completion: Option<String>,
    image: Option<Vec<u8>>,
    usage: Option<TokenUsage>,
    panic_on_generate: bool,
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    analyze_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    last_analysis_images: Mutex<Option<usize>>,
    last_completion: Mutex<Option<String>>,
    last_generate: Mutex<Option<GenerateRequest>>,
}

impl FakeBackend {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reference_limit: 10,
            analysis: Some(format!("{name} style notes")),
            completion: Some(format!("{name} research notes")),
            image: Some(FAKE_PNG.to_vec()),
            usage: None,
            panic_on_generate: false,
            state: Arc::new(FakeState::default()),
        }
    }

    pub(crate) fn with_reference_limit(mut self, limit: usize) -> Self {
        self.reference_limit = limit;
        self
    }

    pub(crate) fn with_analysis(mut self, text: &str) -> Self {
        self.analysis = Some(text.to_string());
        self
    }

    pub(crate) fn failing_analysis(mut self) -> Self {
        self.analysis = None;
        self
    }

    pub(crate) fn with_completion(mut self, text: &str) -> Self {
        self.completion = Some(text.to_string());
        self
    }

    pub(crate) fn failing_completion(mut self) -> Self {
        self.completion = None;
        self
    }

    pub(crate) fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image = Some(bytes);
        self
    }

    pub(crate) fn failing_generation(mut self) -> Self {
        self.image = None;
        self
    }

    pub(crate) fn panicking_generation(mut self) -> Self {
        self.panic_on_generate = true;
        self
    }

    pub(crate) fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub(crate) fn analyze_calls(&self) -> usize {
        self.state.analyze_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn complete_calls(&self) -> usize {
        self.state.complete_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn generate_calls(&self) -> usize {
        self.state.generate_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_analysis_image_count(&self) -> Option<usize> {
        self.state
            .last_analysis_images
            .lock()
            .ok()
            .and_then(|guard| *guard)
    }

    pub(crate) fn last_completion_prompt(&self) -> Option<String> {
        self.state
            .last_completion
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    pub(crate) fn last_generate_request(&self) -> Option<GenerateRequest> {
        self.state
            .last_generate
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_reference_images(&self) -> usize {
        self.reference_limit
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        self.state.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.state.last_generate.lock() {
            *last = Some(request.clone());
        }
        if self.panic_on_generate {
            panic!("{} exploded", self.name);
        }
        let Some(bytes) = self.image.clone() else {
            bail!("{} generation unavailable", self.name);
        };
        let mut response = Map::new();
        response.insert("model".to_string(), json!(format!("{}-fake", self.name)));
        response.insert("b64_json".to_string(), json!("AAAA"));
        Ok(GeneratedImage {
            bytes,
            mime_type: Some("image/png".to_string()),
            usage: self.usage,
            response,
        })
    }

    fn analyze(&self, _instruction: &str, images: &[PathBuf]) -> Result<String> {
        self.state.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.state.last_analysis_images.lock() {
            *last = Some(images.len());
        }
        match &self.analysis {
            Some(text) => Ok(text.clone()),
            None => bail!("{} vision unavailable", self.name),
        }
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.state.complete_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.state.last_completion.lock() {
            *last = Some(prompt.to_string());
        }
        match &self.completion {
            Some(text) => Ok(text.clone()),
            None => bail!("{} text unavailable", self.name),
        }
    }
}
