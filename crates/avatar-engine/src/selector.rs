use std::path::PathBuf;

use avatar_contracts::artifacts::Artifact;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::matcher::MatchResult;

/// Builds the ordered reference set sent upstream.
///
/// Matched concepts use only their matched artifacts, never padded. Unique
/// concepts get a random sample of the library, drawn without replacement.
/// Each consumer takes its own prefix of the result.
pub struct ReferenceSelector {
    cap: usize,
    rng: StdRng,
}

impl ReferenceSelector {
    pub fn new(cap: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { cap, rng }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn select(&mut self, matches: &MatchResult, library: &[Artifact]) -> Vec<PathBuf> {
        if !matches.is_unique_concept() {
            return matches
                .artifacts
                .iter()
                .take(self.cap)
                .map(|artifact| artifact.path.clone())
                .collect();
        }
        library
            .choose_multiple(&mut self.rng, self.cap)
            .map(|artifact| artifact.path.clone())
            .collect()
    }
}
