use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::naming::{display_name, is_image_path, split_timestamp, storage_file_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Reference,
    SecondaryReference,
    Generated,
}

impl ArtifactSource {
    pub const ALL: [ArtifactSource; 3] = [
        ArtifactSource::Reference,
        ArtifactSource::SecondaryReference,
        ArtifactSource::Generated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactSource::Reference => "reference",
            ArtifactSource::SecondaryReference => "secondary_reference",
            ArtifactSource::Generated => "generated",
        }
    }
}

/// One stored image. Never edited in place once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical identity: the file stem, minus the timestamp suffix for generated images.
    pub name: String,
    pub path: PathBuf,
    pub source: ArtifactSource,
    pub timestamp_ms: Option<u64>,
}

impl Artifact {
    pub fn storage_name(&self) -> String {
        self.path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or("png")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryEntry {
    pub display_name: String,
    pub storage_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryLayout {
    pub reference_dir: PathBuf,
    pub secondary_reference_dir: PathBuf,
    pub generated_dir: PathBuf,
}

impl LibraryLayout {
    pub fn under(root: &Path) -> Self {
        Self {
            reference_dir: root.join("references"),
            secondary_reference_dir: root.join("secondary_references"),
            generated_dir: root.join("generated"),
        }
    }

    pub fn dir_for(&self, source: ArtifactSource) -> &Path {
        match source {
            ArtifactSource::Reference => &self.reference_dir,
            ArtifactSource::SecondaryReference => &self.secondary_reference_dir,
            ArtifactSource::Generated => &self.generated_dir,
        }
    }
}

/// Read-mostly view over the three on-disk collections.
///
/// Scans degrade per collection: a missing or unreadable directory lists as empty.
#[derive(Debug, Clone)]
pub struct ArtifactLibrary {
    layout: LibraryLayout,
}

impl ArtifactLibrary {
    pub fn new(layout: LibraryLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    /// Every artifact, references first, each collection sorted by file name.
    pub fn list(&self) -> Vec<Artifact> {
        ArtifactSource::ALL
            .into_iter()
            .flat_map(|source| self.list_source(source))
            .collect()
    }

    pub fn list_source(&self, source: ArtifactSource) -> Vec<Artifact> {
        let dir = self.layout.dir_for(source);
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        collection = source.as_str(),
                        dir = %dir.display(),
                        error = %err,
                        "artifact collection unreadable; treating as empty"
                    );
                }
                return Vec::new();
            }
        };

        let mut paths = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image_path(path))
            .collect::<Vec<PathBuf>>();
        paths.sort();

        paths
            .into_iter()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                let (name, timestamp_ms) = match source {
                    ArtifactSource::Generated => {
                        let (name, stamp) = split_timestamp(&stem);
                        (name.to_string(), stamp)
                    }
                    _ => (stem, None),
                };
                Some(Artifact {
                    name,
                    path,
                    source,
                    timestamp_ms,
                })
            })
            .collect()
    }

    /// Generated artifacts for the gallery, newest first.
    pub fn gallery(&self) -> Vec<GalleryEntry> {
        let mut generated = self.list_source(ArtifactSource::Generated);
        generated.sort_by(|left, right| {
            right
                .timestamp_ms
                .cmp(&left.timestamp_ms)
                .then_with(|| right.path.cmp(&left.path))
        });
        generated
            .into_iter()
            .map(|artifact| {
                let storage_name = artifact.storage_name();
                GalleryEntry {
                    display_name: display_name(&storage_name),
                    storage_name,
                }
            })
            .collect()
    }

    /// Writes a new generated artifact named `{key}_{stamp}.{ext}`.
    ///
    /// Existing files are never overwritten: when the stamp is taken the next
    /// millisecond is tried, so names stay unique and ordered.
    pub fn create_generated(&self, key: &str, bytes: &[u8], ext: &str) -> Result<Artifact> {
        let dir = &self.layout.generated_dir;
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let mut stamp = now_millis();
        loop {
            let path = dir.join(storage_file_name(key, stamp, ext));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    return Ok(Artifact {
                        name: key.to_string(),
                        path,
                        source: ArtifactSource::Generated,
                        timestamp_ms: Some(stamp),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to create {}", path.display()))
                }
            }
        }
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
