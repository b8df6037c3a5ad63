use std::fs;

use anyhow::{Context, Result};

use crate::artifacts::naming::cache_key;
use crate::artifacts::{Artifact, ArtifactLibrary, ArtifactSource};
use crate::concept::{clean_name, underscored_name, Concept};

/// Outcome of a cache lookup that found something servable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    /// The generated-collection artifact to serve.
    pub artifact: Artifact,
    /// Where the bytes originally came from.
    pub origin: ArtifactSource,
}

impl CacheHit {
    pub fn promoted(&self) -> bool {
        self.origin != ArtifactSource::Generated
    }
}

/// Answers "does a satisfying artifact already exist?" before any paid call.
///
/// Lookup order is generated, then primary references, then secondary
/// references. Reference hits are copied into the generated collection under
/// a fresh timestamped name so a reference file is never served directly.
#[derive(Debug, Clone)]
pub struct CacheStore {
    library: ArtifactLibrary,
}

impl CacheStore {
    pub fn new(library: ArtifactLibrary) -> Self {
        Self { library }
    }

    pub fn find(&self, concept: &Concept, backend_tag: Option<&str>) -> Result<Option<CacheHit>> {
        let key = cache_key(concept.underscored(), backend_tag);
        if let Some(artifact) = self.find_generated(&key) {
            return Ok(Some(CacheHit {
                artifact,
                origin: ArtifactSource::Generated,
            }));
        }

        for source in [ArtifactSource::Reference, ArtifactSource::SecondaryReference] {
            let Some(reference) = self.find_reference(source, concept) else {
                continue;
            };
            let promoted = self.promote(&reference, &key)?;
            tracing::info!(
                concept = concept.text(),
                origin = source.as_str(),
                from = %reference.path.display(),
                to = %promoted.path.display(),
                "promoted reference artifact into generated collection"
            );
            return Ok(Some(CacheHit {
                artifact: promoted,
                origin: source,
            }));
        }
        Ok(None)
    }

    /// Newest generated artifact whose logical name is exactly `key`.
    fn find_generated(&self, key: &str) -> Option<Artifact> {
        self.library
            .list_source(ArtifactSource::Generated)
            .into_iter()
            .filter(|artifact| underscored_name(&artifact.name) == key)
            .max_by_key(|artifact| artifact.timestamp_ms)
    }

    fn find_reference(&self, source: ArtifactSource, concept: &Concept) -> Option<Artifact> {
        if concept.clean().is_empty() {
            return None;
        }
        self.library
            .list_source(source)
            .into_iter()
            .find(|artifact| clean_name(&artifact.name) == concept.clean())
    }

    fn promote(&self, reference: &Artifact, key: &str) -> Result<Artifact> {
        let bytes = fs::read(&reference.path)
            .with_context(|| format!("failed reading {}", reference.path.display()))?;
        self.library
            .create_generated(key, &bytes, &reference.extension().to_ascii_lowercase())
    }
}
