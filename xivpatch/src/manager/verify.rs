//! Block hash verification for downloaded patch files.
//!
//! A patch file is split into blocks of `hash_block_size` bytes (the final
//! block may be shorter) and each block's digest is compared with the
//! expected lowercase hex digest at the same index. Verification stops at the
//! first mismatching block.
//!
//! An unrecognised hash type passes verification with a warning. Older and
//! newer patch lists have shipped tags this client does not know, and
//! rejecting them would block patching entirely.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::error::{PatchError, PatchResult};
use crate::patch::PatchDescriptor;

/// Upper bound on the block buffer reserved up front; larger blocks grow it.
const MAX_BLOCK_RESERVE: u64 = 4 * 1024 * 1024;

/// Digest algorithms the verifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-1, used by the patch servers.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// Parse a descriptor's hash type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case("sha1") {
            Some(HashAlgorithm::Sha1)
        } else if tag.eq_ignore_ascii_case("sha256") {
            Some(HashAlgorithm::Sha256)
        } else {
            None
        }
    }

    /// Lowercase hex digest of `data`.
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha1 => hex::encode(Sha1::digest(data)),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

/// Verify a file against a descriptor's block hashes.
///
/// Returns `Ok(false)` on the first block whose digest differs from the
/// expected one, including a missing block (truncated file) or a trailing
/// block with no expected digest (oversized file).
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn verify_blocks(path: &Path, descriptor: &PatchDescriptor) -> PatchResult<bool> {
    let Some(algorithm) = HashAlgorithm::from_tag(&descriptor.hash_type) else {
        warn!(
            hash_type = %descriptor.hash_type,
            url = %descriptor.url,
            "Unknown hash type, skipping verification"
        );
        return Ok(true);
    };

    if descriptor.hash_block_size == 0 {
        return Ok(false);
    }

    let file = File::open(path).map_err(|e| PatchError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    let block_size = descriptor.hash_block_size;
    let reserve = block_size.min(descriptor.length).min(MAX_BLOCK_RESERVE);
    let mut block = Vec::with_capacity(reserve as usize);

    for (index, expected) in descriptor.hashes.iter().enumerate() {
        let read = read_block(&mut reader, &mut block, block_size, path)?;

        if read == 0 || algorithm.hex_digest(&block) != *expected {
            debug!(
                version = %descriptor.version_id,
                block = index,
                read,
                "Block hash mismatch"
            );
            return Ok(false);
        }
    }

    // Anything past the last hashed block means the file is not the patch.
    let trailing = read_block(&mut reader, &mut block, 1, path)?;
    if trailing != 0 {
        debug!(version = %descriptor.version_id, "File longer than its hashed blocks");
        return Ok(false);
    }

    Ok(true)
}

/// Verify on the blocking pool so large files do not stall the runtime.
pub async fn verify_blocks_async(path: &Path, descriptor: &PatchDescriptor) -> PatchResult<bool> {
    let path_owned = path.to_path_buf();
    let descriptor = descriptor.clone();

    tokio::task::spawn_blocking(move || verify_blocks(&path_owned, &descriptor))
        .await
        .map_err(|e| PatchError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
}

/// Fill `block` with up to `size` bytes, returning how many were read.
fn read_block<R: Read>(
    reader: &mut R,
    block: &mut Vec<u8>,
    size: u64,
    path: &Path,
) -> PatchResult<usize> {
    block.clear();
    reader
        .by_ref()
        .take(size)
        .read_to_end(block)
        .map_err(|e| PatchError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}
