mod library;
pub mod naming;

pub use library::{Artifact, ArtifactLibrary, ArtifactSource, GalleryEntry, LibraryLayout};
