//! Installer collaborator.
//!
//! Patches are applied by a separate, privileged installer process. The
//! [`Installer`] trait is the state machine the install sequencer drives:
//!
//! ```text
//! NotStarted ──hello──► Ready ──start_install──► Installing ──ok──► Ready
//!                                                     │
//!                                                     └──failed──► Failed
//! ```
//!
//! [`IpcInstaller`] implements it over any byte stream pair using the
//! newline-delimited JSON protocol in [`protocol`]; [`ProcessInstaller`]
//! launches the installer executable and connects its stdio.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::sync::watch;

use super::error::PatchResult;
use crate::patch::{PatchDescriptor, Repository};

mod ipc;
mod process;
pub mod protocol;

pub use ipc::IpcInstaller;
pub use process::ProcessInstaller;

/// Observable installer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallerState {
    /// Not launched or not yet greeted.
    NotStarted,
    /// Idle and accepting install requests.
    Ready,
    /// Applying a patch.
    Installing,
    /// The last install failed or the installer went away mid-install.
    Failed,
}

impl InstallerState {
    /// Short name for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallerState::NotStarted => "not started",
            InstallerState::Ready => "ready",
            InstallerState::Installing => "installing",
            InstallerState::Failed => "failed",
        }
    }
}

impl fmt::Display for InstallerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One patch to apply.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Root of the game installation.
    pub game_path: PathBuf,
    /// Verified patch file.
    pub patch_file: PathBuf,
    /// Descriptor of the patch.
    pub descriptor: PatchDescriptor,
    /// Repository the patch applies to.
    pub repository: Repository,
}

/// Boxed future returned by [`Installer`] methods.
pub type InstallerFuture<'a, T> = Pin<Box<dyn Future<Output = PatchResult<T>> + Send + 'a>>;

/// Handle to the installer process.
pub trait Installer: Send + Sync {
    /// Launch the installer unless it is already running.
    fn start_if_needed(&self) -> InstallerFuture<'_, ()>;

    /// Wait until the installer has announced itself.
    fn wait_on_hello(&self) -> InstallerFuture<'_, ()>;

    /// Request one patch be applied. Returns once the request is sent; the
    /// outcome is observed through [`state`](Installer::state).
    ///
    /// The state must move to `Installing` before the returned future
    /// completes, or a later `Ready` cannot be told apart from the previous
    /// one.
    fn start_install(&self, request: InstallRequest) -> InstallerFuture<'_, ()>;

    /// Current state.
    fn state(&self) -> InstallerState;

    /// Receiver notified on every state change.
    fn subscribe(&self) -> watch::Receiver<InstallerState>;

    /// Reason given for the most recent failure.
    fn last_failure(&self) -> Option<String>;

    /// Finalize after the last patch.
    fn finish_install(&self, game_path: PathBuf) -> InstallerFuture<'_, ()>;

    /// Ask the installer to exit.
    fn shutdown(&self) -> InstallerFuture<'_, ()>;
}
