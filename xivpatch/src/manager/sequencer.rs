//! Strictly ordered installation.
//!
//! The sequencer walks the catalog with a cursor. For each task it waits for
//! `Downloaded`, hands the file to the installer and waits for the installer
//! to settle before moving on, so task `i + 1` is never `Installing` while
//! task `i` is not `Completed`. Waits are on watch channels, not polls.
//!
//! An install already handed to the installer is always waited out, even if
//! the run is cancelled meanwhile; the installer applies changes the
//! sequencer cannot undo, so it must know how each one ended.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use super::error::{PatchError, PatchResult};
use super::installer::{InstallRequest, Installer, InstallerState};
use super::shutdown::ShutdownSignal;
use crate::patch::{PatchCatalog, PatchState, PatchTask};

pub(crate) struct InstallSequencer<'a> {
    catalog: &'a PatchCatalog,
    installer: &'a dyn Installer,
    game_path: &'a Path,
    cursor: &'a AtomicUsize,
    shutdown: &'a ShutdownSignal,
}

impl<'a> InstallSequencer<'a> {
    pub(crate) fn new(
        catalog: &'a PatchCatalog,
        installer: &'a dyn Installer,
        game_path: &'a Path,
        cursor: &'a AtomicUsize,
        shutdown: &'a ShutdownSignal,
    ) -> Self {
        Self {
            catalog,
            installer,
            game_path,
            cursor,
            shutdown,
        }
    }

    /// Install every patch in order, then finalize.
    ///
    /// Returns [`PatchError::Cancelled`] if the run ends before the last
    /// patch; the cause, if any, is on the shutdown signal.
    pub(crate) async fn run(&self) -> PatchResult<()> {
        let cancel = self.shutdown.child_token();

        for task in self.catalog.iter() {
            self.cursor.store(task.index(), Ordering::Release);

            if task.state() == PatchState::Completed {
                continue;
            }

            let mut state = task.subscribe();
            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PatchError::Cancelled),
                ready = state.wait_for(|s| {
                    matches!(s, PatchState::Downloaded | PatchState::Failed)
                }) => {
                    ready.map(|s| *s).map_err(|_| PatchError::Cancelled)?
                }
            };

            if ready == PatchState::Failed || cancel.is_cancelled() {
                return Err(PatchError::Cancelled);
            }

            self.install(task).await?;
        }

        self.cursor.store(self.catalog.len(), Ordering::Release);

        if cancel.is_cancelled() {
            return Err(PatchError::Cancelled);
        }

        info!(patches = self.catalog.len(), "All patches installed, finalizing");
        self.installer
            .finish_install(self.game_path.to_path_buf())
            .await
    }

    async fn install(&self, task: &PatchTask) -> PatchResult<()> {
        let descriptor = task.descriptor();

        if !task.transition(PatchState::Downloaded, PatchState::Installing) {
            return Err(PatchError::Cancelled);
        }

        let mut installer_state = self.installer.subscribe();
        let request = InstallRequest {
            game_path: self.game_path.to_path_buf(),
            patch_file: task.file().to_path_buf(),
            descriptor: descriptor.clone(),
            repository: task.repository(),
        };

        if let Err(e) = self.installer.start_install(request).await {
            task.fail();
            return Err(PatchError::InstallerFailure {
                version_id: descriptor.version_id.clone(),
                reason: e.to_string(),
            });
        }

        let settled = installer_state
            .wait_for(|s| matches!(s, InstallerState::Ready | InstallerState::Failed))
            .await
            .map(|s| *s)
            .unwrap_or(InstallerState::Failed);

        if settled == InstallerState::Failed {
            task.fail();
            let reason = self
                .installer
                .last_failure()
                .unwrap_or_else(|| "installer reported failure".to_string());
            warn!(version = %descriptor.version_id, reason = %reason, "Install failed");
            return Err(PatchError::InstallerFailure {
                version_id: descriptor.version_id.clone(),
                reason,
            });
        }

        task.transition(PatchState::Installing, PatchState::Completed);
        info!(
            index = task.index(),
            version = %descriptor.version_id,
            repository = %task.repository(),
            "Patch installed"
        );
        Ok(())
    }
}
