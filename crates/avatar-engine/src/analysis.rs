//! Upstream "thinking" calls: style analysis of the references and research
//! on the concept. Both are best-effort and never fail the request.

use std::path::PathBuf;

use serde::Serialize;

use crate::backends::{error_chain_text, Backend};

/// Default number of reference images sent for style analysis.
pub const STYLE_IMAGE_CAP: usize = 8;

pub const DEFAULT_STYLE_GUIDE: &str = "Retro-futuristic robot characters built from weathered, \
slightly scuffed metal panels with visible rivets and seams. Large expressive round eyes with \
glossy lenses. Muted, desaturated palette with one restrained accent color. Soft diffuse studio \
lighting with gentle ambient occlusion and subtle rim light. Chunky, friendly proportions with a \
slightly oversized head. Moderate surface detail: wear, small decals without text, cables at the \
joints. Three-quarter view, single character, clean backdrop.";

const KNOWN_CONCEPT_STYLE_INSTRUCTION: &str = "You are an art director building a style guide \
from reference images of robot characters that belong to one family. Describe, as concrete \
guidance an illustrator could match closely:\n\
1. Overall aesthetic and era.\n\
2. Materials and surface finish.\n\
3. Color approach and palette.\n\
4. Body proportions and silhouette.\n\
5. Face and eye design.\n\
6. Level of detail and wear.\n\
7. Lighting setup.\n\
8. Motifs that repeat across the images.\n\
Return plain descriptive prose, no lists of file names, no JSON.";

const UNIQUE_CONCEPT_STYLE_INSTRUCTION: &str = "You are an art director. These reference images \
show ONLY the rendering quality a new, unrelated character must share. Describe exclusively:\n\
1. Rendering technique (3D, shading model, level of realism).\n\
2. Materials and surface finish.\n\
3. Lighting setup.\n\
4. Background treatment.\n\
5. Overall production quality.\n\
Do NOT describe the specific creatures, shapes, silhouettes, body plans or forms shown in the \
references; those must not be copied. Return plain descriptive prose, no JSON.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub text: String,
    /// Backend that produced the text, or `"default"` / `"skipped"`.
    pub source: String,
}

impl Insight {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source.as_str(), "default" | "skipped")
    }
}

pub fn style_instruction(is_unique_concept: bool) -> &'static str {
    if is_unique_concept {
        UNIQUE_CONCEPT_STYLE_INSTRUCTION
    } else {
        KNOWN_CONCEPT_STYLE_INSTRUCTION
    }
}

/// Sends up to `image_cap` references to the vision backends in order and
/// returns the first usable description, or [`DEFAULT_STYLE_GUIDE`].
pub fn analyze_style(
    backends: &[&dyn Backend],
    references: &[PathBuf],
    is_unique_concept: bool,
    image_cap: usize,
) -> Insight {
    let images: Vec<PathBuf> = references.iter().take(image_cap).cloned().collect();
    if images.is_empty() {
        tracing::info!("no reference images available; using default style guide");
        return default_style();
    }

    let instruction = style_instruction(is_unique_concept);
    for backend in backends {
        match backend.analyze(instruction, &images) {
            Ok(text) if !text.trim().is_empty() => {
                return Insight {
                    text: text.trim().to_string(),
                    source: backend.name().to_string(),
                };
            }
            Ok(_) => tracing::warn!(backend = backend.name(), "style analysis returned no text"),
            Err(err) => tracing::warn!(
                backend = backend.name(),
                error = %error_chain_text(&err, 400),
                "style analysis failed"
            ),
        }
    }
    default_style()
}

pub fn default_style() -> Insight {
    Insight {
        text: DEFAULT_STYLE_GUIDE.to_string(),
        source: "default".to_string(),
    }
}

pub fn research_instruction(concept: &str) -> String {
    format!(
        "Research the concept \"{concept}\" as the subject of a robot mascot.\n\
First decide whether it is a KNOWN technology (programming language, framework, tool, \
protocol or established technical idea) or a UNIQUE/custom concept, and say which.\n\
If KNOWN, report: official brand colors (with hex values when known), logo shapes and visual \
elements, the design philosophy or community character, and metaphors or creatures associated \
with it.\n\
If UNIQUE, invent: a set of visual metaphors that express what the name suggests, a small color \
palette, and distinctive design cues. Do not borrow from existing trademarks, logos or mascots.\n\
Answer in concise plain prose, no JSON, no markdown headings."
    )
}

/// Asks the text backends in order about `concept`; falls back to a stub.
pub fn research_concept(backends: &[&dyn Backend], concept: &str) -> Insight {
    let instruction = research_instruction(concept);
    for backend in backends {
        match backend.complete(&instruction) {
            Ok(text) if !text.trim().is_empty() => {
                return Insight {
                    text: text.trim().to_string(),
                    source: backend.name().to_string(),
                };
            }
            Ok(_) => tracing::warn!(backend = backend.name(), "concept research returned no text"),
            Err(err) => tracing::warn!(
                backend = backend.name(),
                error = %error_chain_text(&err, 400),
                "concept research failed"
            ),
        }
    }
    fallback_research(concept, "default")
}

pub fn fallback_research(concept: &str, source: &str) -> Insight {
    Insight {
        text: format!(
            "Concept: {concept}. Express the character of \"{concept}\" through shape, color \
and small mechanical details rather than any written name."
        ),
        source: source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        analyze_style, research_concept, style_instruction, DEFAULT_STYLE_GUIDE, STYLE_IMAGE_CAP,
    };
    use crate::backends::Backend;
    use crate::test_support::FakeBackend;

    fn refs(count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|idx| PathBuf::from(format!("/refs/{idx}.png")))
            .collect()
    }

    #[test]
    fn style_uses_first_successful_backend_and_caps_images() {
        let broken = FakeBackend::new("alpha").failing_analysis();
        let working = FakeBackend::new("beta").with_analysis("brushed chrome, teal accents");
        let backends: Vec<&dyn Backend> = vec![&broken, &working];

        let insight = analyze_style(&backends, &refs(12), false, STYLE_IMAGE_CAP);
        assert_eq!(insight.source, "beta");
        assert_eq!(insight.text, "brushed chrome, teal accents");
        assert_eq!(working.last_analysis_image_count(), Some(STYLE_IMAGE_CAP));
        assert_eq!(broken.analyze_calls(), 1);
    }

    #[test]
    fn style_image_cap_is_caller_controlled() {
        let working = FakeBackend::new("alpha");
        let backends: Vec<&dyn Backend> = vec![&working];
        analyze_style(&backends, &refs(12), false, 12);
        assert_eq!(working.last_analysis_image_count(), Some(12));
        analyze_style(&backends, &refs(12), true, 3);
        assert_eq!(working.last_analysis_image_count(), Some(3));
    }

    #[test]
    fn style_falls_back_to_default_when_every_backend_fails() {
        let broken = FakeBackend::new("alpha").failing_analysis();
        let backends: Vec<&dyn Backend> = vec![&broken];
        let insight = analyze_style(&backends, &refs(2), true, STYLE_IMAGE_CAP);
        assert_eq!(insight.text, DEFAULT_STYLE_GUIDE);
        assert!(insight.is_fallback());
    }

    #[test]
    fn style_without_references_skips_backends() {
        let working = FakeBackend::new("alpha").with_analysis("x");
        let backends: Vec<&dyn Backend> = vec![&working];
        let insight = analyze_style(&backends, &[], false, STYLE_IMAGE_CAP);
        assert_eq!(insight.text, DEFAULT_STYLE_GUIDE);
        assert_eq!(working.analyze_calls(), 0);
    }

    #[test]
    fn unique_instruction_forbids_describing_forms() {
        assert!(style_instruction(true).contains("Do NOT describe the specific creatures"));
        assert!(!style_instruction(false).contains("Do NOT describe"));
        assert!(style_instruction(false).contains("Face and eye design"));
    }

    #[test]
    fn research_falls_back_across_backends_then_to_stub() {
        let broken = FakeBackend::new("alpha").failing_completion();
        let working = FakeBackend::new("beta").with_completion("Blue and yellow, snakes.");
        let backends: Vec<&dyn Backend> = vec![&broken, &working];
        let insight = research_concept(&backends, "Python");
        assert_eq!(insight.source, "beta");
        assert!(working.last_completion_prompt().unwrap_or_default().contains("\"Python\""));

        let only_broken: Vec<&dyn Backend> = vec![&broken];
        let fallback = research_concept(&only_broken, "Python");
        assert!(fallback.is_fallback());
        assert!(fallback.text.contains("Python"));
    }
}
