use std::collections::HashSet;

use avatar_contracts::artifacts::Artifact;
use avatar_contracts::concept::{clean_name, Concept};
use serde::Serialize;

/// Tokens shorter than this never match, so "C" in "C++ Tools" can't pull in stray names.
pub const MIN_TOKEN_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Word,
}

/// Artifacts judged related to a concept. Only one tier is ever populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub tier: Option<MatchTier>,
    pub artifacts: Vec<Artifact>,
}

impl MatchResult {
    /// Nothing in the library relates to the concept.
    pub fn is_unique_concept(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .map(|artifact| artifact.name.clone())
            .collect()
    }
}

/// Finds prior artifacts that should anchor a new generation.
///
/// Exact tier first: one artifact whose cleaned name equals the cleaned
/// concept. Otherwise the word tier: one artifact per distinct token match,
/// in token order.
pub fn match_concept(concept: &Concept, library: &[Artifact]) -> MatchResult {
    if !concept.clean().is_empty() {
        if let Some(artifact) = find_by_clean_name(library, concept.clean()) {
            return MatchResult {
                tier: Some(MatchTier::Exact),
                artifacts: vec![artifact.clone()],
            };
        }
    }

    let mut seen = HashSet::new();
    let mut artifacts = Vec::new();
    for token in concept.tokens() {
        if token.chars().count() < MIN_TOKEN_CHARS {
            continue;
        }
        let cleaned = clean_name(token);
        if cleaned.is_empty() || seen.contains(&cleaned) {
            continue;
        }
        if let Some(artifact) = find_by_clean_name(library, &cleaned) {
            seen.insert(cleaned);
            artifacts.push(artifact.clone());
        }
    }

    if artifacts.is_empty() {
        return MatchResult::default();
    }
    MatchResult {
        tier: Some(MatchTier::Word),
        artifacts,
    }
}

fn find_by_clean_name<'a>(library: &'a [Artifact], cleaned: &str) -> Option<&'a Artifact> {
    library
        .iter()
        .find(|artifact| clean_name(&artifact.name) == cleaned)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use avatar_contracts::artifacts::{Artifact, ArtifactSource};
    use avatar_contracts::concept::Concept;

    use super::{match_concept, MatchTier};

    fn artifact(name: &str, source: ArtifactSource) -> Artifact {
        Artifact {
            name: name.to_string(),
            path: PathBuf::from(format!("/lib/{name}.png")),
            source,
            timestamp_ms: None,
        }
    }

    fn library() -> Vec<Artifact> {
        vec![
            artifact("python", ArtifactSource::Reference),
            artifact("Go", ArtifactSource::Reference),
            artifact("rust", ArtifactSource::SecondaryReference),
            artifact("python_optimizer", ArtifactSource::Generated),
            artifact("c", ArtifactSource::Reference),
        ]
    }

    #[test]
    fn exact_tier_returns_a_single_artifact() {
        let result = match_concept(&Concept::new("PYTHON"), &library());
        assert_eq!(result.tier, Some(MatchTier::Exact));
        assert_eq!(result.names(), vec!["python"]);
        assert!(!result.is_unique_concept());
    }

    #[test]
    fn exact_tier_wins_over_word_tier() {
        let result = match_concept(&Concept::new("Python Optimizer"), &library());
        assert_eq!(result.tier, Some(MatchTier::Exact));
        assert_eq!(result.names(), vec!["python_optimizer"]);
    }

    #[test]
    fn word_tier_matches_known_base_names() {
        let lib: Vec<_> = library()
            .into_iter()
            .filter(|artifact| artifact.name != "python_optimizer")
            .collect();
        let result = match_concept(&Concept::new("Python Optimizer"), &lib);
        assert_eq!(result.tier, Some(MatchTier::Word));
        assert_eq!(result.names(), vec!["python"]);
    }

    #[test]
    fn word_tier_keeps_token_order_and_dedupes() {
        let result = match_concept(&Concept::new("rust-go & RUST, python+go"), &library());
        assert_eq!(result.tier, Some(MatchTier::Word));
        assert_eq!(result.names(), vec!["rust", "Go", "python"]);
    }

    #[test]
    fn single_character_tokens_are_ignored() {
        let result = match_concept(&Concept::new("C + Tools"), &library());
        assert!(result.is_unique_concept());
        assert_eq!(result.tier, None);
    }

    #[test]
    fn unmatched_concepts_are_unique() {
        let result = match_concept(&Concept::new("Quantum Teapot"), &library());
        assert!(result.is_unique_concept());
        assert!(match_concept(&Concept::new("!!!"), &library()).is_unique_concept());
    }
}
