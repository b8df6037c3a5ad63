use thiserror::Error;

/// Failures surfaced by [`crate::AvatarEngine::resolve`].
///
/// Analysis and research failures never appear here; they degrade to
/// defaults. Fan-out reports per-backend failures inside the outcome instead.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("concept is required")]
    MissingConcept,
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
    #[error("no generation backends are configured")]
    NoBackends,
    #[error("{backend} generation failed: {message}")]
    Generation { backend: String, message: String },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ResolveError {
    /// Stable kind tag for machine-readable output.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::MissingConcept | ResolveError::UnknownBackend(_) => "input_invalid",
            ResolveError::NoBackends => "not_configured",
            ResolveError::Generation { .. } => "upstream_fatal",
            ResolveError::Storage(_) => "storage",
        }
    }
}
