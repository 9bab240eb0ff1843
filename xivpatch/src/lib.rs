//! XIVPatch - patch download and installation for a game client
//!
//! Given the ordered patch list returned by the game's patch server, this
//! library downloads every patch with bounded concurrency, verifies each file
//! against its block hashes, and hands the files one at a time, in order, to
//! an external installer process.
//!
//! - [`patch`]: patch descriptors and the per-task state catalog
//! - [`manager`]: the download, verify and install pipeline
//! - [`config`]: the persistent INI settings file
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod logging;
pub mod manager;
pub mod patch;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
