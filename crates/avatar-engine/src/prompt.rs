//! Deterministic, backend-agnostic generation instruction.
//!
//! Section order is fixed: realism, no-text, identity branch, style guide,
//! composition, research, no-text reminder. Only the identity branch and the
//! inserted style/research text vary between requests.

pub const REALISM_DIRECTIVE: &str = "RENDERING: Produce a photorealistic 3D-rendered character \
with physically based materials, real depth, global illumination and sharp focus. This is a \
3D render, NOT a flat illustration, cartoon drawing, vector graphic or sketch.";

pub const NO_TEXT_DIRECTIVE: &str = "ABSOLUTELY NO TEXT: The image must not contain any letters, \
words, numbers, labels, logos with lettering, captions, signatures or watermarks anywhere. Do \
not write or render the concept name itself on the character, its accessories or the background.";

pub const COMPOSITION_CONSTRAINTS: &str = "COMPOSITION:\n\
- Pure white background, no scenery.\n\
- Three-quarter view, body turned toward the left of the frame.\n\
- Exactly one character, fully in frame, centered.\n\
- Square 1:1 framing with comfortable margins.";

pub const NO_TEXT_REMINDER: &str = "FINAL REMINDER: zero text of any kind in the image. No \
letters, no words, no numbers, no name.";

/// Opening of the matched-concept branch.
pub const IDENTITY_DIRECTIVE: &str = "Maintain the core visual identity";

/// Opening of the unmatched-concept branch.
pub const ORIGINALITY_DIRECTIVE: &str = "This must be a wholly original design";

pub struct PromptInputs<'a> {
    pub concept: &'a str,
    pub style_guide: &'a str,
    pub research: &'a str,
    /// Logical names of matched artifacts; empty for a unique concept.
    pub matched_names: &'a [String],
}

pub fn compose_prompt(inputs: &PromptInputs<'_>) -> String {
    let concept = inputs.concept.trim();
    let sections = [
        REALISM_DIRECTIVE.to_string(),
        NO_TEXT_DIRECTIVE.to_string(),
        identity_section(concept, inputs.matched_names),
        format!("STYLE GUIDE:\n{}", inputs.style_guide.trim()),
        COMPOSITION_CONSTRAINTS.to_string(),
        format!(
            "CONCEPT RESEARCH for \"{concept}\":\n{}",
            inputs.research.trim()
        ),
        NO_TEXT_REMINDER.to_string(),
    ];
    sections.join("\n\n")
}

fn identity_section(concept: &str, matched_names: &[String]) -> String {
    if matched_names.is_empty() {
        return format!(
            "SUBJECT: A robot character embodying \"{concept}\". {ORIGINALITY_DIRECTIVE}: invent a \
new body plan, silhouette and creature type. It must not resemble the shapes, forms or \
characters in any of the supplied reference images. The references convey ONLY the rendering \
quality, materials and lighting to match, never what to draw."
        );
    }

    let family = matched_names
        .iter()
        .map(|name| display_family_name(name))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "SUBJECT: A robot character for \"{concept}\", evolved from the existing {family} \
character(s) shown in the reference images. {IDENTITY_DIRECTIVE} of each: keep the same \
creature, head shape, body form and signature features so it is instantly recognizable as a \
variant of that family. Evolve it with concept-specific variation (accessories, color accents, \
pose, small details); do not replace it with a different character."
    )
}

fn display_family_name(name: &str) -> String {
    name.replace('_', " ").trim().to_string()
}
