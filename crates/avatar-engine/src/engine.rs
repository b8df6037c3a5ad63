use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use avatar_contracts::artifacts::naming::{cache_key, extension_for_mime};
use avatar_contracts::artifacts::{Artifact, ArtifactLibrary, ArtifactSource, GalleryEntry};
use avatar_contracts::concept::Concept;
use avatar_contracts::events::EventWriter;
use avatar_contracts::pricing::{estimate_tokens, CostAccountant, CostEstimate, TokenUsage};
use avatar_contracts::request::{BackendSelector, GenerationRequest, ThinkingMode};
use avatar_contracts::runs::cache::{CacheHit, CacheStore};
use avatar_contracts::runs::receipts::{build_receipt, receipt_path, write_receipt, ReceiptInput};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::analysis::{analyze_style, default_style, fallback_research, research_concept, Insight};
use crate::backends::http::truncate_text;
use crate::backends::{
    default_backend_registry, error_chain_text, Backend, BackendRegistry, GeminiSettings,
    OpenAiSettings,
};
use crate::config::EngineConfig;
use crate::dispatch::{dispatch, dispatch_all, Dispatched};
use crate::error::ResolveError;
use crate::matcher::match_concept;
use crate::prompt::{compose_prompt, PromptInputs};
use crate::selector::ReferenceSelector;

const CHECK_PROMPT: &str = "Connectivity check. Reply with the single word: ok";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timings {
    pub thinking_s: f64,
    pub generation_s: f64,
}

/// One backend's answer to a request, cached or fresh.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub concept: String,
    pub backend: String,
    pub artifact: Artifact,
    pub storage_name: String,
    pub cached: bool,
    /// Collection the cached artifact was found in; `None` for fresh results.
    pub cache_origin: Option<ArtifactSource>,
    pub research_summary: Option<String>,
    pub style_summary: Option<String>,
    pub token_usage: TokenUsage,
    pub cost: CostEstimate,
    pub timings: Timings,
    pub matched_names: Vec<String>,
    pub is_unique_concept: bool,
    pub prompt_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendOutcome {
    Ready(GenerationResult),
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Single(GenerationResult),
    FanOut {
        /// In backend tag order.
        results: IndexMap<String, BackendOutcome>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendCheck {
    pub backend: String,
    pub ok: bool,
    pub message: String,
    pub cost_usd: f64,
}

/// Shared output of matching, selection and thinking for one request.
struct GenerationPlan {
    prompt: String,
    references: Vec<PathBuf>,
    matched_names: Vec<String>,
    is_unique_concept: bool,
    style: Insight,
    research: Insight,
    thinking_s: f64,
}

pub struct AvatarEngine {
    config: EngineConfig,
    library: ArtifactLibrary,
    cache: CacheStore,
    backends: BackendRegistry,
    accountant: CostAccountant,
    selector: ReferenceSelector,
    events: EventWriter,
}

impl AvatarEngine {
    pub fn new(config: EngineConfig, backends: BackendRegistry) -> Self {
        let library = ArtifactLibrary::new(config.layout.clone());
        let accountant = CostAccountant::load(config.pricing_overrides.as_deref());
        let selector = ReferenceSelector::new(config.reference_cap, config.reference_seed);
        let events = EventWriter::new(config.events_path.clone(), Uuid::new_v4().to_string());
        Self {
            cache: CacheStore::new(library.clone()),
            library,
            backends,
            accountant,
            selector,
            events,
            config,
        }
    }

    /// Engine over `root` with the Gemini and OpenAI backends configured from the environment.
    pub fn from_env(root: &Path) -> Self {
        let registry =
            default_backend_registry(GeminiSettings::from_env(), OpenAiSettings::from_env());
        Self::new(EngineConfig::from_env(root), registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.names()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Cache-or-generate entry point.
    pub fn resolve(&mut self, request: &GenerationRequest) -> Result<ResolveOutcome, ResolveError> {
        let concept = Concept::new(request.concept.as_str());
        if concept.is_blank() {
            return Err(ResolveError::MissingConcept);
        }
        if self.backends.is_empty() {
            return Err(ResolveError::NoBackends);
        }
        if let BackendSelector::Single(name) = &request.backend {
            if self.backends.get(name).is_none() {
                return Err(ResolveError::UnknownBackend(name.clone()));
            }
        }

        self.events.record(
            "resolve_started",
            json!({
                "concept": concept.text(),
                "backend": request.backend.to_string(),
                "thinking": request.thinking,
            }),
        );
        tracing::info!(
            concept = concept.text(),
            backend = %request.backend,
            thinking = ?request.thinking,
            "resolving concept"
        );

        match &request.backend {
            BackendSelector::Single(name) => self
                .resolve_single(&concept, name, request.thinking)
                .map(ResolveOutcome::Single),
            BackendSelector::All => Ok(ResolveOutcome::FanOut {
                results: self.resolve_fan_out(&concept, request.thinking),
            }),
        }
    }

    /// Sends a tiny completion to each selected backend.
    pub fn test_backend(
        &self,
        selector: &BackendSelector,
    ) -> Result<Vec<BackendCheck>, ResolveError> {
        if self.backends.is_empty() {
            return Err(ResolveError::NoBackends);
        }
        let backends: Vec<&dyn Backend> = match selector {
            BackendSelector::Single(name) => vec![self
                .backends
                .get(name)
                .ok_or_else(|| ResolveError::UnknownBackend(name.clone()))?],
            BackendSelector::All => self.backends.iter().collect(),
        };
        Ok(backends
            .into_iter()
            .map(|backend| self.check(backend))
            .collect())
    }

    /// Generated artifacts, newest first.
    pub fn list_generated(&self) -> Vec<GalleryEntry> {
        self.library.gallery()
    }

    fn resolve_single(
        &mut self,
        concept: &Concept,
        name: &str,
        thinking: ThinkingMode,
    ) -> Result<GenerationResult, ResolveError> {
        if let Some(hit) = self.cache.find(concept, None)? {
            return Ok(self.cached_result(concept, name, hit)?);
        }

        let plan = self.plan(concept, thinking);
        let backend = self
            .backends
            .get(name)
            .ok_or_else(|| ResolveError::UnknownBackend(name.to_string()))?;
        let dispatched = match dispatch(backend, &plan.prompt, &plan.references, &self.accountant) {
            Ok(dispatched) => dispatched,
            Err(err) => {
                let message = error_chain_text(&err, 800);
                self.record_failure(concept, name, &message);
                return Err(ResolveError::Generation {
                    backend: name.to_string(),
                    message,
                });
            }
        };
        Ok(self.persist(concept, None, &plan, dispatched)?)
    }

    fn resolve_fan_out(
        &mut self,
        concept: &Concept,
        thinking: ThinkingMode,
    ) -> IndexMap<String, BackendOutcome> {
        let names = self.backends.names();
        let mut settled = BTreeMap::new();
        let mut misses = Vec::new();
        for name in &names {
            let outcome = self
                .cache
                .find(concept, Some(name.as_str()))
                .and_then(|hit| match hit {
                    Some(hit) => self.cached_result(concept, name, hit).map(Some),
                    None => Ok(None),
                });
            match outcome {
                Ok(Some(result)) => {
                    settled.insert(name.clone(), BackendOutcome::Ready(result));
                }
                Ok(None) => misses.push(name.clone()),
                Err(err) => {
                    let message = error_chain_text(&err, 800);
                    self.record_failure(concept, name, &message);
                    settled.insert(name.clone(), BackendOutcome::Failed { message });
                }
            }
        }

        if !misses.is_empty() {
            let plan = self.plan(concept, thinking);
            let backends: Vec<&dyn Backend> = misses
                .iter()
                .filter_map(|name| self.backends.get(name))
                .collect();
            let outcomes =
                dispatch_all(&backends, &plan.prompt, &plan.references, &self.accountant);
            for (name, outcome) in outcomes {
                let outcome = outcome.and_then(|dispatched| {
                    self.persist(concept, Some(name.as_str()), &plan, dispatched)
                });
                let outcome = match outcome {
                    Ok(result) => BackendOutcome::Ready(result),
                    Err(err) => {
                        let message = error_chain_text(&err, 800);
                        self.record_failure(concept, &name, &message);
                        BackendOutcome::Failed { message }
                    }
                };
                settled.insert(name, outcome);
            }
        }

        names
            .into_iter()
            .filter_map(|name| settled.remove(&name).map(|outcome| (name, outcome)))
            .collect()
    }

    /// Matching and selection run once per request, then thinking.
    fn plan(&mut self, concept: &Concept, thinking: ThinkingMode) -> GenerationPlan {
        let library = self.library.list();
        let matches = match_concept(concept, &library);
        let references = self.selector.select(&matches, &library);
        let matched_names = matches.names();
        let is_unique_concept = matches.is_unique_concept();

        let started = Instant::now();
        let (style, research) = match thinking {
            ThinkingMode::Full => self.think(concept, &references, is_unique_concept),
            ThinkingMode::Fast => (default_style(), fallback_research(concept.text(), "skipped")),
        };
        let thinking_s = started.elapsed().as_secs_f64();

        let prompt = compose_prompt(&PromptInputs {
            concept: concept.text(),
            style_guide: &style.text,
            research: &research.text,
            matched_names: &matched_names,
        });
        self.events.record(
            "thinking_finished",
            json!({
                "concept": concept.text(),
                "matched_names": matched_names,
                "references": references.len(),
                "style_source": style.source,
                "research_source": research.source,
                "thinking_s": thinking_s,
            }),
        );
        GenerationPlan {
            prompt,
            references,
            matched_names,
            is_unique_concept,
            style,
            research,
            thinking_s,
        }
    }

    /// Style analysis and research, concurrently.
    fn think(
        &self,
        concept: &Concept,
        references: &[PathBuf],
        is_unique_concept: bool,
    ) -> (Insight, Insight) {
        let backends: Vec<&dyn Backend> = self.backends.iter().collect();
        let image_cap = self.config.style_image_cap;
        thread::scope(|scope| {
            let style = scope
                .spawn(|| analyze_style(&backends, references, is_unique_concept, image_cap));
            let research = research_concept(&backends, concept.text());
            let style = style.join().unwrap_or_else(|_| {
                tracing::warn!("style analysis thread panicked; using default style guide");
                default_style()
            });
            (style, research)
        })
    }

    fn cached_result(
        &self,
        concept: &Concept,
        backend: &str,
        hit: CacheHit,
    ) -> Result<GenerationResult> {
        let image_bytes = std::fs::read(&hit.artifact.path)
            .with_context(|| format!("failed reading {}", hit.artifact.path.display()))?;
        let storage_name = hit.artifact.storage_name();
        self.events.record(
            "cache_hit",
            json!({
                "concept": concept.text(),
                "backend": backend,
                "storage_name": storage_name,
                "origin": hit.origin,
                "promoted": hit.promoted(),
            }),
        );
        tracing::info!(
            concept = concept.text(),
            backend,
            storage_name = %storage_name,
            origin = hit.origin.as_str(),
            "cache hit"
        );
        let cost = CostEstimate::cached();
        Ok(GenerationResult {
            image_bytes,
            concept: concept.text().to_string(),
            backend: backend.to_string(),
            artifact: hit.artifact,
            storage_name,
            cached: true,
            cache_origin: Some(hit.origin),
            research_summary: None,
            style_summary: None,
            token_usage: cost.usage,
            cost,
            timings: Timings::default(),
            matched_names: Vec::new(),
            is_unique_concept: false,
            prompt_sha256: None,
        })
    }

    fn persist(
        &self,
        concept: &Concept,
        backend_tag: Option<&str>,
        plan: &GenerationPlan,
        dispatched: Dispatched,
    ) -> Result<GenerationResult> {
        let key = cache_key(concept.underscored(), backend_tag);
        let ext = extension_for_mime(dispatched.image.mime_type.as_deref());
        let artifact = self
            .library
            .create_generated(&key, &dispatched.image.bytes, ext)?;
        let storage_name = artifact.storage_name();
        let generation_s = dispatched.elapsed.as_secs_f64();

        let receipt = build_receipt(ReceiptInput {
            concept: concept.text(),
            backend: &dispatched.backend,
            artifact: &artifact,
            prompt: &plan.prompt,
            reference_images: &dispatched.references,
            matched_names: &plan.matched_names,
            cost: &dispatched.cost,
            thinking_s: plan.thinking_s,
            generation_s,
            backend_response: &dispatched.image.response,
        });
        if let Some(path) = receipt_path(&self.config.receipts_dir, &artifact) {
            if let Err(err) = write_receipt(&path, &receipt) {
                tracing::warn!(path = %path.display(), error = %err, "failed to write receipt");
            }
        }

        self.events.record(
            "generation_finished",
            json!({
                "concept": concept.text(),
                "backend": dispatched.backend,
                "storage_name": storage_name,
                "cost_usd": dispatched.cost.usd,
                "cost_basis": dispatched.cost.basis,
                "generation_s": generation_s,
            }),
        );

        Ok(GenerationResult {
            concept: concept.text().to_string(),
            backend: dispatched.backend,
            artifact,
            storage_name,
            cached: false,
            cache_origin: None,
            research_summary: Some(truncate_text(
                &plan.research.text,
                self.config.research_display_chars,
            )),
            style_summary: Some(plan.style.text.clone()),
            token_usage: dispatched.cost.usage,
            cost: dispatched.cost,
            timings: Timings {
                thinking_s: plan.thinking_s,
                generation_s,
            },
            matched_names: plan.matched_names.clone(),
            is_unique_concept: plan.is_unique_concept,
            prompt_sha256: Some(receipt.prompt_sha256),
            image_bytes: dispatched.image.bytes,
        })
    }

    fn check(&self, backend: &dyn Backend) -> BackendCheck {
        match backend.complete(CHECK_PROMPT) {
            Ok(reply) => BackendCheck {
                backend: backend.name().to_string(),
                ok: true,
                message: truncate_text(reply.trim(), 200),
                cost_usd: self.accountant.completion_cost(
                    backend.name(),
                    estimate_tokens(CHECK_PROMPT),
                    estimate_tokens(&reply),
                ),
            },
            Err(err) => BackendCheck {
                backend: backend.name().to_string(),
                ok: false,
                message: error_chain_text(&err, 400),
                cost_usd: 0.0,
            },
        }
    }

    fn record_failure(&self, concept: &Concept, backend: &str, message: &str) {
        tracing::warn!(concept = concept.text(), backend, error = %message, "generation failed");
        self.events.record(
            "generation_failed",
            json!({
                "concept": concept.text(),
                "backend": backend,
                "error": message,
            }),
        );
    }
}
