//! Installer running as a child process.
//!
//! The executable is spawned with piped stdin/stdout and spoken to with the
//! line protocol. Its stderr is inherited so installer diagnostics reach the
//! user's terminal.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use super::ipc::IpcInstaller;
use super::{InstallRequest, Installer, InstallerFuture, InstallerState};
use crate::manager::error::{PatchError, PatchResult};

/// How long the installer gets to exit after `exit` before it is killed.
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`Installer`] backed by an external executable.
pub struct ProcessInstaller {
    executable: PathBuf,
    args: Vec<OsString>,
    ipc: IpcInstaller<ChildStdin>,
    child: Mutex<Option<Child>>,
}

impl ProcessInstaller {
    /// Create a handle for `executable`. Nothing is launched until
    /// [`Installer::start_if_needed`].
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            ipc: IpcInstaller::new(),
            child: Mutex::new(None),
        }
    }

    /// Extra command line arguments for the executable.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Path of the installer executable.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    async fn launch(&self) -> PatchResult<()> {
        let mut child = self.child.lock().await;

        if let Some(running) = child.as_mut() {
            match running.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => info!(%status, "Installer exited, restarting"),
                Err(e) => warn!(error = %e, "Could not poll installer, restarting"),
            }
        }

        info!(executable = %self.executable.display(), "Starting installer");

        let mut spawned = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PatchError::Io {
                path: self.executable.clone(),
                source: e,
            })?;

        let stdin = spawned
            .stdin
            .take()
            .ok_or_else(|| PatchError::Protocol("installer stdin unavailable".to_string()))?;
        let stdout = spawned
            .stdout
            .take()
            .ok_or_else(|| PatchError::Protocol("installer stdout unavailable".to_string()))?;

        self.ipc.attach(stdout, stdin).await;
        *child = Some(spawned);
        Ok(())
    }

    async fn stop(&self) -> PatchResult<()> {
        self.ipc.shutdown().await?;

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "Installer exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for installer"),
            Err(_) => {
                warn!("Installer did not exit, killing it");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill installer");
                }
            }
        }
        Ok(())
    }
}

impl Installer for ProcessInstaller {
    fn start_if_needed(&self) -> InstallerFuture<'_, ()> {
        Box::pin(self.launch())
    }

    fn wait_on_hello(&self) -> InstallerFuture<'_, ()> {
        self.ipc.wait_on_hello()
    }

    fn start_install(&self, request: InstallRequest) -> InstallerFuture<'_, ()> {
        self.ipc.start_install(request)
    }

    fn state(&self) -> InstallerState {
        self.ipc.state()
    }

    fn subscribe(&self) -> watch::Receiver<InstallerState> {
        self.ipc.subscribe()
    }

    fn last_failure(&self) -> Option<String> {
        self.ipc.last_failure()
    }

    fn finish_install(&self, game_path: PathBuf) -> InstallerFuture<'_, ()> {
        self.ipc.finish_install(game_path)
    }

    fn shutdown(&self) -> InstallerFuture<'_, ()> {
        Box::pin(self.stop())
    }
}
