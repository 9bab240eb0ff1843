//! Patch descriptors and repository classification.
//!
//! A [`PatchDescriptor`] is the immutable description of one downloadable
//! patch file as published by the patch server. Descriptors arrive already
//! resolved and ordered; this module only parses and validates them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::manager::{PatchError, PatchResult};

/// Game component a patch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repository {
    /// Launcher/boot files.
    Boot,
    /// Base game.
    Ffxiv,
    /// First expansion.
    Ex1,
    /// Second expansion.
    Ex2,
    /// Third expansion.
    Ex3,
}

impl Repository {
    /// Classify a patch by substring matching on its URL.
    ///
    /// Checked in order `boot`, `ex1`, `ex2`, `ex3`; anything else is the
    /// base game.
    pub fn from_url(url: &str) -> Self {
        if url.contains("boot") {
            Repository::Boot
        } else if url.contains("ex1") {
            Repository::Ex1
        } else if url.contains("ex2") {
            Repository::Ex2
        } else if url.contains("ex3") {
            Repository::Ex3
        } else {
            Repository::Ffxiv
        }
    }

    /// Lowercase name used in logs and on the installer wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Repository::Boot => "boot",
            Repository::Ffxiv => "ffxiv",
            Repository::Ex1 => "ex1",
            Repository::Ex2 => "ex2",
            Repository::Ex3 => "ex3",
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable metadata for one patch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDescriptor {
    /// Version identifier, e.g. `2023.07.26.0000.0001`.
    pub version_id: String,
    /// Download URL.
    pub url: String,
    /// File size in bytes.
    pub length: u64,
    /// Name of the block hash algorithm (`sha1` on current servers).
    pub hash_type: String,
    /// Size of each hashed block in bytes.
    pub hash_block_size: u64,
    /// Expected lowercase hex digest of every block, in file order.
    pub hashes: Vec<String>,
}

impl PatchDescriptor {
    /// Repository this patch applies to, derived from the URL.
    pub fn repository(&self) -> Repository {
        Repository::from_url(&self.url)
    }

    /// Number of hash blocks the file is expected to have.
    pub fn expected_blocks(&self) -> u64 {
        if self.hash_block_size == 0 {
            return 0;
        }
        self.length.div_ceil(self.hash_block_size)
    }

    /// Check the block hash invariant.
    pub fn validate(&self) -> PatchResult<()> {
        if self.hash_block_size == 0 {
            return Err(PatchError::InvalidPatchList(format!(
                "patch {} has a hash block size of 0",
                self.version_id
            )));
        }

        let expected = self.expected_blocks();
        if self.hashes.len() as u64 != expected {
            return Err(PatchError::InvalidPatchList(format!(
                "patch {} lists {} block hashes, expected {} for {} bytes in {} byte blocks",
                self.version_id,
                self.hashes.len(),
                expected,
                self.length,
                self.hash_block_size
            )));
        }

        Ok(())
    }

    /// Path of the URL relative to its host, used to lay out the patch store.
    ///
    /// `http://patch-dl.example.com/game/4e9a232b/D2023.07.26.0000.0001.patch`
    /// becomes `game/4e9a232b/D2023.07.26.0000.0001.patch`.
    pub fn relative_path(&self) -> PatchResult<PathBuf> {
        let parsed = Url::parse(&self.url).map_err(|e| {
            PatchError::InvalidPatchList(format!("invalid URL {}: {}", self.url, e))
        })?;

        let relative: PathBuf = parsed
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .collect();

        if relative.as_os_str().is_empty() {
            return Err(PatchError::InvalidPatchList(format!(
                "URL {} has no file path",
                self.url
            )));
        }

        Ok(relative)
    }
}

/// Parse a JSON patch list and validate every entry.
pub fn parse_patch_list(json: &str) -> PatchResult<Vec<PatchDescriptor>> {
    let descriptors: Vec<PatchDescriptor> = serde_json::from_str(json)
        .map_err(|e| PatchError::InvalidPatchList(format!("malformed patch list: {}", e)))?;

    for descriptor in &descriptors {
        descriptor.validate()?;
    }

    Ok(descriptors)
}

/// Load a JSON patch list from disk.
pub fn load_patch_list(path: &Path) -> PatchResult<Vec<PatchDescriptor>> {
    let json = fs::read_to_string(path).map_err(|e| PatchError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_patch_list(&json)
}
