//! Patch download, verification and installation pipeline.
//!
//! # Architecture
//!
//! ```text
//! PatchManager (orchestrator)
//!         │
//!         ├── preflight        disk space checks
//!         ├── download         DownloadScheduler ── PatchTransport
//!         ├── verify           block hash verification
//!         ├── sequencer        InstallSequencer ── Installer
//!         └── installer        IPC state machine, child process
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use xivpatch::manager::{HttpTransport, PatchManager, PatchManagerConfig, ProcessInstaller};
//!
//! let config = PatchManagerConfig::new(game_path, patch_store);
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let installer = Arc::new(ProcessInstaller::new("xivpatch-installer"));
//!
//! let manager = PatchManager::new(descriptors, config, installer, transport)?;
//! manager.run().await?;
//! ```

mod config;
pub mod download;
mod error;
pub mod installer;
mod orchestrator;
mod preflight;
mod sequencer;
mod shutdown;
mod verify;

pub use config::{
    PatchManagerConfig, DEFAULT_CHUNKS_PER_FILE, DEFAULT_CONCURRENCY, DEFAULT_LOOKAHEAD_WINDOW,
    DEFAULT_RANGE_ATTEMPTS, DEFAULT_USER_AGENT,
};
pub use download::{HttpTransport, PatchTransport, SlotSnapshot, TransferError};
pub use error::{PatchError, PatchResult, SpaceConstraint, SpaceShortfall};
pub use installer::{
    InstallRequest, Installer, InstallerFuture, InstallerState, IpcInstaller, ProcessInstaller,
};
pub use orchestrator::{PatchManager, PatchOutcome, ProgressSnapshot, StateCounts};
pub use preflight::{
    check_space, format_bytes, run_preflight, FreeSpaceProbe, SpaceRequirements, SystemFreeSpace,
};
pub use verify::{verify_blocks, verify_blocks_async, HashAlgorithm};
