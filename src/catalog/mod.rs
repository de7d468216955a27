//! Background track catalog
//!
//! A flat directory of audio files. The directory is re-read on every call,
//! so tracks added or removed on disk show up immediately.

use std::path::{Path, PathBuf};

use crate::error::{MixerError, Result};

/// File extensions served as background tracks (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// Read-only view of the catalog directory
#[derive(Debug, Clone)]
pub struct TrackCatalog {
    root: PathBuf,
}

impl TrackCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Supported regular files in the directory, sorted by name.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| MixerError::Catalog(format!("{}: {}", self.root.display(), e)))?;

        let mut tracks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MixerError::Catalog(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() || !is_supported(&path) {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => tracks.push(name),
                Err(name) => tracing::warn!(?name, "Skipping track with non-UTF-8 name"),
            }
        }
        tracks.sort();
        Ok(tracks)
    }

    /// Path of a listed track.
    ///
    /// Names that could escape the directory, unsupported extensions and
    /// missing files are all reported as not found.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let not_found = || MixerError::TrackNotFound(name.to_string());

        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(not_found());
        }

        let path = self.root.join(name);
        if !is_supported(&path) || !path.is_file() {
            return Err(not_found());
        }
        Ok(path)
    }
}
