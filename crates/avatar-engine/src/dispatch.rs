use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use avatar_contracts::pricing::{CostAccountant, CostEstimate};

use crate::backends::{Backend, GenerateRequest, GeneratedImage};

/// One backend's normalized generation outcome.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub backend: String,
    pub image: GeneratedImage,
    pub cost: CostEstimate,
    pub elapsed: Duration,
    /// The prefix of the shared reference set this backend actually received.
    pub references: Vec<PathBuf>,
}

/// Calls one backend and maps its raw usage into the common cost shape.
///
/// A response without image bytes is a generation failure.
pub fn dispatch(
    backend: &dyn Backend,
    prompt: &str,
    references: &[PathBuf],
    accountant: &CostAccountant,
) -> Result<Dispatched> {
    let request = GenerateRequest {
        prompt: prompt.to_string(),
        reference_images: references
            .iter()
            .take(backend.max_reference_images())
            .cloned()
            .collect(),
    };

    let started = Instant::now();
    let image = backend.generate(&request)?;
    let elapsed = started.elapsed();
    if image.bytes.is_empty() {
        bail!("{} returned no image bytes", backend.name());
    }

    let cost = accountant.generation_cost(backend.name(), image.usage.as_ref());
    tracing::info!(
        backend = backend.name(),
        references = request.reference_images.len(),
        bytes = image.bytes.len(),
        cost_usd = cost.usd,
        elapsed_s = elapsed.as_secs_f64(),
        "generation finished"
    );
    Ok(Dispatched {
        backend: backend.name().to_string(),
        image,
        cost,
        elapsed,
        references: request.reference_images,
    })
}

/// Runs [`dispatch`] for every backend concurrently and waits for all of them.
///
/// Outcomes come back in input order; one backend failing or panicking never
/// affects the others.
pub fn dispatch_all(
    backends: &[&dyn Backend],
    prompt: &str,
    references: &[PathBuf],
    accountant: &CostAccountant,
) -> Vec<(String, Result<Dispatched>)> {
    thread::scope(|scope| {
        let handles = backends
            .iter()
            .map(|backend| {
                let backend = *backend;
                let handle =
                    scope.spawn(move || dispatch(backend, prompt, references, accountant));
                (backend.name().to_string(), handle)
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|(name, handle)| {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("{name} generation thread panicked")));
                (name, outcome)
            })
            .collect()
    })
}
