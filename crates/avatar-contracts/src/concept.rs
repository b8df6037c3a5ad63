/// Free-text subject of a request together with its two normalized forms.
///
/// - `clean` keeps only lowercased alphanumerics (any script) and is used for name matching.
/// - `underscored` replaces every other character with `_` and is used for file names.
///
/// Both forms are total and idempotent: normalizing an already-normalized value
/// returns it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concept {
    raw: String,
    clean: String,
    underscored: String,
}

impl Concept {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let clean = clean_name(&raw);
        let underscored = underscored_name(&raw);
        Self {
            raw,
            clean,
            underscored,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The trimmed display form of the input.
    pub fn text(&self) -> &str {
        self.raw.trim()
    }

    pub fn clean(&self) -> &str {
        &self.clean
    }

    pub fn underscored(&self) -> &str {
        &self.underscored
    }

    /// True when nothing nameable is left after normalization, e.g. `"  "` or `"!!!"`.
    pub fn is_blank(&self) -> bool {
        self.clean.is_empty()
    }

    /// Tokens used by word-level matching, in the order they appear.
    pub fn tokens(&self) -> Vec<&str> {
        split_tokens(&self.raw)
    }
}

pub fn clean_name(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|ch| ch.is_alphanumeric())
        .collect()
}

pub fn underscored_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|ch| if ch.is_alphanumeric() { ch } else { '_' })
        .collect()
}

pub fn split_tokens(raw: &str) -> Vec<&str> {
    raw.split(|ch: char| ch.is_whitespace() || matches!(ch, '-' | '_' | ',' | '&' | '+'))
        .filter(|token| !token.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{clean_name, split_tokens, underscored_name, Concept};

    #[test]
    fn clean_form_drops_everything_but_alphanumerics() {
        assert_eq!(clean_name("Python 3.12"), "python312");
        assert_eq!(clean_name("C++"), "c");
        assert_eq!(clean_name("  Node.js "), "nodejs");
        assert_eq!(clean_name("Café"), "café");
    }

    #[test]
    fn non_ascii_scripts_keep_distinct_forms() {
        assert_eq!(clean_name("日本"), "日本");
        assert_eq!(clean_name("ΩΜ"), "ωμ");
        assert_eq!(underscored_name("Ωμ Lang"), "ωμ_lang");
        assert_ne!(underscored_name("日本"), underscored_name("Ωμ"));
    }

    #[test]
    fn underscored_form_replaces_each_separator() {
        assert_eq!(underscored_name("C++"), "c__");
        assert_eq!(underscored_name("Rust Lang"), "rust_lang");
        assert_eq!(underscored_name("  Go  "), "go");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Python Optimizer",
            "C#",
            "ñandú & co",
            "A-B_C,D+E",
            "İstanbul",
            "",
            "   ",
        ];
        for raw in samples {
            let clean = clean_name(raw);
            assert_eq!(clean_name(&clean), clean);
            let underscored = underscored_name(raw);
            assert_eq!(underscored_name(&underscored), underscored);
        }
    }

    #[test]
    fn tokens_split_on_word_separators() {
        assert_eq!(
            split_tokens("Rust & Go+Zig, type-script  lua_jit"),
            vec!["Rust", "Go", "Zig", "type", "script", "lua", "jit"]
        );
        assert!(split_tokens("  ").is_empty());
    }

    #[test]
    fn blank_concepts_are_detected() {
        assert!(Concept::new("  \t").is_blank());
        assert!(Concept::new("!!!").is_blank());
        assert!(!Concept::new("日本").is_blank());
        let concept = Concept::new(" Haskell ");
        assert!(!concept.is_blank());
        assert_eq!(concept.text(), "Haskell");
        assert_eq!(concept.clean(), "haskell");
        assert_eq!(concept.underscored(), "haskell");
    }
}
