//! Patch run orchestration.
//!
//! [`PatchManager`] owns the catalog and the slot counters and drives one
//! run through its phases:
//!
//! ```text
//! preflight ──► installer handshake ──┬──► DownloadScheduler (K slots) ──┐
//!                                     │                                  ├──► outcome
//!                                     └──► InstallSequencer (in order) ──┘
//! ```
//!
//! The scheduler and sequencer run concurrently and share only the catalog
//! and the shutdown signal. The run ends when the sequencer finishes,
//! fails or is cancelled; the first fatal error wins and exactly one
//! [`PatchOutcome`] is published.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::config::PatchManagerConfig;
use super::download::{DownloadScheduler, PatchTransport, SlotCounters, SlotSnapshot};
use super::error::{PatchError, PatchResult};
use super::installer::Installer;
use super::preflight::{run_preflight, FreeSpaceProbe, SystemFreeSpace};
use super::sequencer::InstallSequencer;
use super::shutdown::ShutdownSignal;
use crate::patch::{PatchCatalog, PatchDescriptor, PatchState};

/// Terminal result of a run, published once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Whether every patch was installed.
    pub success: bool,
    /// User-facing failure message. `None` on success and on cancellation.
    pub error: Option<String>,
}

impl PatchOutcome {
    fn from_result(result: &PatchResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                error: None,
            },
            Err(e) if e.is_cancelled() => Self {
                success: false,
                error: None,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Number of tasks in each state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateCounts {
    pub pending: usize,
    pub downloading: usize,
    pub downloaded: usize,
    pub installing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    fn add(&mut self, state: PatchState) {
        match state {
            PatchState::Pending => self.pending += 1,
            PatchState::Downloading => self.downloading += 1,
            PatchState::Downloaded => self.downloaded += 1,
            PatchState::Installing => self.installing += 1,
            PatchState::Completed => self.completed += 1,
            PatchState::Failed => self.failed += 1,
        }
    }
}

/// Point-in-time view of a run for progress displays.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// One entry per download slot.
    pub slots: Vec<SlotSnapshot>,
    /// Bytes still to download: each not yet downloaded patch's size minus
    /// what its slot has received.
    pub remaining_bytes: u64,
    /// Combined size of every patch.
    pub total_bytes: u64,
    /// Catalog index the sequencer is at. Equals `total_patches` once done.
    pub install_index: usize,
    /// Number of patches in the run.
    pub total_patches: usize,
    /// Tasks per state.
    pub counts: StateCounts,
    /// Whether every patch has left the download phase.
    pub downloads_done: bool,
}

impl ProgressSnapshot {
    /// Combined rate of every slot.
    pub fn bytes_per_second(&self) -> f64 {
        self.slots.iter().map(|s| s.bytes_per_second).sum()
    }
}

/// Runs one patch pipeline.
pub struct PatchManager {
    config: PatchManagerConfig,
    catalog: PatchCatalog,
    slots: SlotCounters,
    installer: Arc<dyn Installer>,
    transport: Arc<dyn PatchTransport>,
    space_probe: Box<dyn FreeSpaceProbe>,
    install_cursor: AtomicUsize,
    downloads_done: AtomicBool,
    started: AtomicBool,
    shutdown: ShutdownSignal,
    outcome: watch::Sender<Option<PatchOutcome>>,
}

impl PatchManager {
    /// Build a manager for `descriptors`, in install order.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InvalidPatchList`] if a descriptor is malformed.
    pub fn new(
        descriptors: Vec<PatchDescriptor>,
        config: PatchManagerConfig,
        installer: Arc<dyn Installer>,
        transport: Arc<dyn PatchTransport>,
    ) -> PatchResult<Self> {
        let catalog = PatchCatalog::new(descriptors, &config.patch_store)?;
        let slots = SlotCounters::new(config.concurrency.max(1));

        Ok(Self {
            config,
            catalog,
            slots,
            installer,
            transport,
            space_probe: Box::new(SystemFreeSpace),
            install_cursor: AtomicUsize::new(0),
            downloads_done: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
            outcome: watch::channel(None).0,
        })
    }

    /// Use a custom free space source for the preflight.
    pub fn with_space_probe(mut self, probe: impl FreeSpaceProbe + 'static) -> Self {
        self.space_probe = Box::new(probe);
        self
    }

    /// The run's configuration.
    pub fn config(&self) -> &PatchManagerConfig {
        &self.config
    }

    /// The task catalog.
    pub fn catalog(&self) -> &PatchCatalog {
        &self.catalog
    }

    /// Receiver for the terminal outcome. Holds `None` until the run ends.
    pub fn subscribe_outcome(&self) -> watch::Receiver<Option<PatchOutcome>> {
        self.outcome.subscribe()
    }

    /// Cancel the run. In-flight transfers stop; no error is reported.
    pub fn cancel(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Cancelling patch run");
        }
        self.shutdown.cancel();
    }

    /// Current progress.
    pub fn progress(&self) -> ProgressSnapshot {
        let slots = self.slots.snapshot();
        let mut counts = StateCounts::default();
        let mut remaining_bytes = 0u64;
        let mut total_bytes = 0u64;

        for task in self.catalog.iter() {
            let state = task.state();
            let length = task.descriptor().length;
            counts.add(state);
            total_bytes += length;

            if state.is_awaiting_download() {
                let received = self.slots.received_for_task(task.index()).unwrap_or(0);
                remaining_bytes += length.saturating_sub(received);
            }
        }

        ProgressSnapshot {
            slots,
            remaining_bytes,
            total_bytes,
            install_index: self.install_cursor.load(Ordering::Acquire),
            total_patches: self.catalog.len(),
            counts,
            downloads_done: self.downloads_done.load(Ordering::Acquire),
        }
    }

    /// Run the pipeline to completion.
    ///
    /// A manager runs once; later calls return
    /// [`PatchError::AlreadyStarted`].
    pub async fn run(&self) -> PatchResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PatchError::AlreadyStarted);
        }

        let result = match self.execute().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.shutdown.take_error().unwrap_or(e)),
        };

        match &result {
            Ok(()) => info!(patches = self.catalog.len(), "Patching complete"),
            Err(e) => {
                self.shutdown.cancel();
                let failed = self.catalog.fail_unfinished();
                if e.is_cancelled() {
                    info!(unfinished = failed, "Patching cancelled");
                } else {
                    error!(unfinished = failed, error = %e, "Patching failed");
                }
            }
        }

        self.publish(&result);
        result
    }

    async fn execute(&self) -> PatchResult<()> {
        info!(
            patches = self.catalog.len(),
            concurrency = self.slots.len(),
            store = %self.config.patch_store.display(),
            game = %self.config.game_path.display(),
            "Starting patch run"
        );

        if self.config.enforce_preflight {
            run_preflight(
                &self.catalog,
                self.config.lookahead_window,
                &self.config.patch_store,
                &self.config.game_path,
                self.space_probe.as_ref(),
            )?;
        } else {
            warn!("Disk space checks disabled");
        }

        tokio::fs::create_dir_all(&self.config.patch_store)
            .await
            .map_err(|e| PatchError::Io {
                path: self.config.patch_store.clone(),
                source: e,
            })?;

        if self.catalog.is_empty() {
            self.mark_downloads_done();
            return Ok(());
        }

        self.handshake().await?;

        let scheduler = DownloadScheduler::new(
            &self.catalog,
            &self.slots,
            self.transport.as_ref(),
            &self.shutdown,
            self.config.per_slot_speed_limit(),
        );
        let sequencer = InstallSequencer::new(
            &self.catalog,
            self.installer.as_ref(),
            &self.config.game_path,
            &self.install_cursor,
            &self.shutdown,
        );

        let downloads = async {
            scheduler.run().await;
            if !self.shutdown.is_cancelled() && self.catalog.downloads_finished() {
                self.mark_downloads_done();
            }
        };

        let installs = async {
            match sequencer.run().await {
                Ok(()) => Ok(()),
                Err(e) => {
                    // Stops the downloads; the winning error is read back in `run`.
                    self.shutdown.raise(e);
                    Err(PatchError::Cancelled)
                }
            }
        };

        let ((), installed) = tokio::join!(downloads, installs);
        installed
    }

    async fn handshake(&self) -> PatchResult<()> {
        let cancel = self.shutdown.child_token();
        let handshake = async {
            self.installer.start_if_needed().await?;
            self.installer.wait_on_hello().await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PatchError::Cancelled),
            result = handshake => result,
        }
    }

    fn mark_downloads_done(&self) {
        if !self.downloads_done.swap(true, Ordering::AcqRel) {
            self.slots.reset_all();
            info!("All patches downloaded");
        }
    }

    fn publish(&self, result: &PatchResult<()>) {
        let outcome = PatchOutcome::from_result(result);
        self.outcome.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        });
    }
}
