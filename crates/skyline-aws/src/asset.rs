//! In-memory code archives

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A named text file inside an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringAsset(String);

impl StringAsset {
    /// Create new text asset
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Asset contents
    #[must_use]
    pub fn text(&self) -> &str {
        &self.0
    }
}

/// Bundle of named assets standing in for a deployment package.
///
/// Serialised together with a SHA-256 digest of its contents so a content
/// change shows up as a changed `code` input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ArchiveWire", try_from = "ArchiveWire")]
pub struct AssetArchive {
    assets: BTreeMap<String, StringAsset>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveWire {
    assets: BTreeMap<String, StringAsset>,
    hash: String,
}

impl From<AssetArchive> for ArchiveWire {
    fn from(archive: AssetArchive) -> Self {
        let hash = archive.hash();
        Self {
            assets: archive.assets,
            hash,
        }
    }
}

impl TryFrom<ArchiveWire> for AssetArchive {
    type Error = String;

    fn try_from(wire: ArchiveWire) -> Result<Self, Self::Error> {
        let archive = Self {
            assets: wire.assets,
        };
        let actual = archive.hash();
        if actual != wire.hash {
            return Err(format!("archive hash mismatch: recorded {}, computed {actual}", wire.hash));
        }
        Ok(archive)
    }
}

impl AssetArchive {
    /// Empty archive
    #[must_use]
    pub fn new() -> Self {
        Self {
            assets: BTreeMap::new(),
        }
    }

    /// With a named asset
    #[must_use]
    pub fn with_asset(mut self, path: impl Into<String>, asset: StringAsset) -> Self {
        self.assets.insert(path.into(), asset);
        self
    }

    /// Asset at `path`
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&StringAsset> {
        self.assets.get(path)
    }

    /// Paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.assets.keys().map(String::as_str)
    }

    /// Total size of all assets in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.assets.values().map(|a| a.0.len()).sum()
    }

    /// Hex SHA-256 over every path and its contents
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, asset) in &self.assets {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update((asset.0.len() as u64).to_le_bytes());
            hasher.update(asset.0.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl Default for AssetArchive {
    fn default() -> Self {
        Self::new()
    }
}
