//! Wire protocol spoken with the installer process.
//!
//! Messages are JSON objects tagged by `type`, one per line:
//!
//! ```text
//! launcher → installer   {"type":"hello"}
//! installer → launcher   {"type":"hello","version":"1.2.0"}
//! launcher → installer   {"type":"install","game_path":"...","patch_file":"...",
//!                         "repository":"ex1","descriptor":{"versionId":"...",...}}
//! installer → launcher   {"type":"install_ok"} | {"type":"install_failed","reason":"..."}
//! launcher → installer   {"type":"finish","game_path":"..."}
//! installer → launcher   {"type":"finish_ok"}
//! launcher → installer   {"type":"exit"}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::manager::error::{PatchError, PatchResult};
use crate::patch::{PatchDescriptor, Repository};

/// Messages sent to the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallerRequest {
    /// Ask the installer to announce itself.
    Hello,
    /// Apply one patch file to the game.
    Install {
        game_path: PathBuf,
        patch_file: PathBuf,
        repository: Repository,
        descriptor: PatchDescriptor,
    },
    /// All patches applied; finalize the installation.
    Finish { game_path: PathBuf },
    /// Terminate the installer.
    Exit,
}

/// Messages received from the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallerResponse {
    /// The installer is up and accepting requests.
    Hello {
        #[serde(default)]
        version: Option<String>,
    },
    /// The last install request succeeded.
    InstallOk,
    /// The last install request failed.
    InstallFailed { reason: String },
    /// Finalization completed.
    FinishOk,
}

/// Serialize a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> PatchResult<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| PatchError::Protocol(format!("failed to encode message: {}", e)))?;
    line.push('\n');
    Ok(line)
}

impl InstallerResponse {
    /// Parse one line received from the installer.
    pub fn from_line(line: &str) -> PatchResult<Self> {
        serde_json::from_str(line.trim()).map_err(|e| {
            PatchError::Protocol(format!("malformed installer message {:?}: {}", line, e))
        })
    }
}
