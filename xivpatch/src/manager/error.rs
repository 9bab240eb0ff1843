//! Error types for the patch manager.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::download::TransferError;
use super::preflight::format_bytes;

/// Result type for patch manager operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Which disk space precondition was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceConstraint {
    /// Download volume cannot hold the single largest patch.
    DownloadLargest,
    /// Download volume cannot hold the next few patches.
    DownloadWindow,
    /// Install volume cannot hold every pending patch.
    Install,
}

/// Details of a failed disk space check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceShortfall {
    /// The failing constraint.
    pub constraint: SpaceConstraint,
    /// Bytes needed.
    pub required: u64,
    /// Bytes free on the relevant volume.
    pub available: u64,
}

impl fmt::Display for SpaceShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.constraint {
            SpaceConstraint::DownloadLargest => {
                "There is not enough space on your drive to download patches. \
                 You can change the location patches are downloaded to in the settings."
            }
            SpaceConstraint::DownloadWindow => {
                "There is not enough space on your drive to download all patches. \
                 You can change the location patches are downloaded to in the settings."
            }
            SpaceConstraint::Install => {
                "There is not enough space on your drive to install patches. \
                 You can change the location the game is installed to in the settings."
            }
        };

        write!(
            f,
            "{} Required: {} Free: {}",
            what,
            format_bytes(self.required),
            format_bytes(self.available)
        )
    }
}

/// Errors that can end a patch run.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Preflight disk space check failed.
    #[error("{0}")]
    InsufficientSpace(SpaceShortfall),

    /// A downloaded file did not match its block hashes.
    #[error("could not verify the downloaded files for patch {version_id} ({})", .path.display())]
    IntegrityFailure { version_id: String, path: PathBuf },

    /// The transfer of a patch failed.
    #[error("could not download patch {version_id}: {source}")]
    TransportFailure {
        version_id: String,
        #[source]
        source: TransferError,
    },

    /// The installer reported a failure applying a patch.
    #[error("installer failed to apply patch {version_id}: {reason}")]
    InstallerFailure { version_id: String, reason: String },

    /// The run was cancelled. Not a user-facing error.
    #[error("patching was cancelled")]
    Cancelled,

    /// Filesystem operation failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The patch list is malformed or violates an invariant.
    #[error("invalid patch list: {0}")]
    InvalidPatchList(String),

    /// The installer spoke out of turn or went away.
    #[error("installer protocol error: {0}")]
    Protocol(String),

    /// `run` was called on a manager that already ran.
    #[error("patch run already started")]
    AlreadyStarted,
}

impl PatchError {
    /// Whether this is the cancellation outcome, which should not be shown
    /// to the user as an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PatchError::Cancelled)
    }

    /// Shorthand for an insufficient space error.
    pub fn insufficient_space(constraint: SpaceConstraint, required: u64, available: u64) -> Self {
        PatchError::InsufficientSpace(SpaceShortfall {
            constraint,
            required,
            available,
        })
    }
}
