use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which backend(s) should serve a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelector {
    Single(String),
    All,
}

impl FromStr for BackendSelector {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => Err("backend selector must not be empty".to_string()),
            "all" | "both" => Ok(BackendSelector::All),
            _ => Ok(BackendSelector::Single(normalized)),
        }
    }
}

impl fmt::Display for BackendSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSelector::Single(name) => f.write_str(name),
            BackendSelector::All => f.write_str("all"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    /// Runs concept research and style analysis before composing the prompt.
    #[default]
    Full,
    /// Skips both and uses the fixed defaults.
    Fast,
}

impl FromStr for ThinkingMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "thinking" | "on" => Ok(ThinkingMode::Full),
            "fast" | "off" => Ok(ThinkingMode::Fast),
            other => Err(format!("unknown thinking mode '{other}' (expected full|fast)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub concept: String,
    pub backend: BackendSelector,
    #[serde(default)]
    pub thinking: ThinkingMode,
}

impl GenerationRequest {
    pub fn new(
        concept: impl Into<String>,
        backend: BackendSelector,
        thinking: ThinkingMode,
    ) -> Self {
        Self {
            concept: concept.into(),
            backend,
            thinking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendSelector, GenerationRequest, ThinkingMode};

    #[test]
    fn selectors_parse_all_and_single_names() {
        assert_eq!("all".parse::<BackendSelector>(), Ok(BackendSelector::All));
        assert_eq!("Both".parse::<BackendSelector>(), Ok(BackendSelector::All));
        assert_eq!(
            " Gemini ".parse::<BackendSelector>(),
            Ok(BackendSelector::Single("gemini".to_string()))
        );
        assert!("  ".parse::<BackendSelector>().is_err());
        assert_eq!(BackendSelector::All.to_string(), "all");
    }

    #[test]
    fn thinking_mode_parses_and_defaults_to_full() {
        assert_eq!("fast".parse::<ThinkingMode>(), Ok(ThinkingMode::Fast));
        assert_eq!("FULL".parse::<ThinkingMode>(), Ok(ThinkingMode::Full));
        assert!("sometimes".parse::<ThinkingMode>().is_err());
        assert_eq!(ThinkingMode::default(), ThinkingMode::Full);
    }

    #[test]
    fn request_deserializes_without_thinking_mode() -> anyhow::Result<()> {
        let request: GenerationRequest =
            serde_json::from_str(r#"{"concept": "Rust", "backend": "all"}"#)?;
        assert_eq!(
            request,
            GenerationRequest::new("Rust", BackendSelector::All, ThinkingMode::Full)
        );
        Ok(())
    }
}
