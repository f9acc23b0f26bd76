//! Precache manifest: the build-time list of assets needed for offline boot.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::hash::fingerprint;

/// One build asset and the content revision it was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    /// Absolute, or relative to the application origin.
    pub url: String,
    pub revision: String,
}

impl PrecacheEntry {
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self { url: url.into(), revision: revision.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<PrecacheEntry>),
    Wrapped { entries: Vec<PrecacheEntry> },
}

/// Versioned asset manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrecacheManifest {
    entries: Vec<PrecacheEntry>,
}

impl PrecacheManifest {
    /// Build a manifest, rejecting empty fields and duplicate URLs.
    pub fn new(entries: Vec<PrecacheEntry>) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.url.trim().is_empty() {
                return Err(Error::InvalidManifest("entry with empty url".into()));
            }
            if entry.revision.trim().is_empty() {
                return Err(Error::InvalidManifest(format!("{} has an empty revision", entry.url)));
            }
            if !seen.insert(entry.url.as_str()) {
                return Err(Error::InvalidManifest(format!("duplicate url {}", entry.url)));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a JSON manifest: either a bare list or `{"entries": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let file: ManifestFile = serde_json::from_str(json).map_err(|e| Error::InvalidManifest(e.to_string()))?;
        match file {
            ManifestFile::List(entries) | ManifestFile::Wrapped { entries } => Self::new(entries),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidManifest(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn entries(&self) -> &[PrecacheEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable identifier of the manifest contents, independent of order.
    ///
    /// Used as the layer version when none is given explicitly.
    pub fn fingerprint(&self) -> String {
        let mut lines: Vec<String> = self.entries.iter().map(|e| format!("{} {}", e.url, e.revision)).collect();
        lines.sort();
        fingerprint(lines.iter().map(String::as_str))
    }
}
