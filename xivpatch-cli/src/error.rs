//! CLI error type.

use std::path::PathBuf;

use thiserror::Error;
use xivpatch::config::ConfigError;
use xivpatch::logging::LoggingError;
use xivpatch::manager::{PatchError, TransferError};

/// Errors surfaced to the user by a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Missing or conflicting settings.
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("failed to create HTTP client: {0}")]
    Transport(#[from] TransferError),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// One or more files failed verification.
    #[error("{failed} of {checked} patch files failed verification")]
    Verification { checked: usize, failed: usize },

    #[error("patch file {} is not in the patch list", .0.display())]
    UnknownPatchFile(PathBuf),
}
