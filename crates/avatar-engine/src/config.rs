use std::path::{Path, PathBuf};

use avatar_contracts::artifacts::LibraryLayout;

use crate::analysis::STYLE_IMAGE_CAP;
use crate::backends::http::non_empty_env;

pub const DEFAULT_REFERENCE_CAP: usize = 10;
pub const DEFAULT_RESEARCH_DISPLAY_CHARS: usize = 600;
pub const EVENTS_FILE_NAME: &str = "events.jsonl";
pub const RECEIPTS_DIR_NAME: &str = "receipts";
pub const RUN_DIR_NAME: &str = "runs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub layout: LibraryLayout,
    /// Upper bound on the shared reference set.
    pub reference_cap: usize,
    pub style_image_cap: usize,
    /// Research text in results is truncated to this many characters.
    pub research_display_chars: usize,
    /// Seeds reference sampling; entropy when unset.
    pub reference_seed: Option<u64>,
    pub pricing_overrides: Option<PathBuf>,
    /// Run bookkeeping lives beside the collections, never inside `generated`.
    pub events_path: PathBuf,
    pub receipts_dir: PathBuf,
}

impl EngineConfig {
    pub fn under(root: &Path) -> Self {
        Self::with_layout(LibraryLayout::under(root), &root.join(RUN_DIR_NAME))
    }

    pub fn with_layout(layout: LibraryLayout, run_dir: &Path) -> Self {
        Self {
            layout,
            reference_cap: DEFAULT_REFERENCE_CAP,
            style_image_cap: STYLE_IMAGE_CAP,
            research_display_chars: DEFAULT_RESEARCH_DISPLAY_CHARS,
            reference_seed: None,
            pricing_overrides: None,
            events_path: run_dir.join(EVENTS_FILE_NAME),
            receipts_dir: run_dir.join(RECEIPTS_DIR_NAME),
        }
    }

    pub fn from_env(root: &Path) -> Self {
        Self::from_lookup(root, non_empty_env)
    }

    /// Builds a config from `lookup`, which must return trimmed, non-empty
    /// values or `None`.
    pub fn from_lookup(root: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut layout = LibraryLayout::under(root);
        if let Some(dir) = lookup("AVATAR_REFERENCE_DIR") {
            layout.reference_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("AVATAR_SECONDARY_REFERENCE_DIR") {
            layout.secondary_reference_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("AVATAR_GENERATED_DIR") {
            layout.generated_dir = PathBuf::from(dir);
        }

        let run_dir = lookup("AVATAR_RUN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join(RUN_DIR_NAME));
        let mut config = Self::with_layout(layout, &run_dir);
        if let Some(raw) = lookup("AVATAR_REFERENCE_CAP") {
            match raw.parse::<usize>() {
                Ok(cap) if cap > 0 => config.reference_cap = cap,
                _ => tracing::warn!(value = %raw, "ignoring invalid AVATAR_REFERENCE_CAP"),
            }
        }
        if let Some(raw) = lookup("AVATAR_REFERENCE_SEED") {
            match raw.parse::<u64>() {
                Ok(seed) => config.reference_seed = Some(seed),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid AVATAR_REFERENCE_SEED"),
            }
        }
        config.pricing_overrides = lookup("AVATAR_PRICING_OVERRIDES").map(PathBuf::from);
        config
    }
}
