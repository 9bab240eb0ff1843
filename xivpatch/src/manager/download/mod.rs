//! Patch downloading.
//!
//! - Transport abstraction and errors (`transport`)
//! - HTTP transport with parallel byte ranges and retry (`http`)
//! - Per-transfer bandwidth limiting (`throttle`)
//! - Per-slot progress counters and rate estimation (`progress`)
//! - Slot workers that claim, fetch and verify patches (`scheduler`)
//!
//! # Architecture
//!
//! ```text
//! DownloadScheduler
//!         │
//!         ├── slot workers (one per concurrency slot)
//!         │       └── PatchTransport (trait)
//!         │               └── HttpTransport
//!         │                       ├── BandwidthThrottle
//!         │                       └── RateMeter
//!         │
//!         └── SlotCounters (read by progress snapshots)
//! ```

mod http;
mod progress;
mod scheduler;
mod throttle;
mod transport;

pub use http::{split_ranges, ByteRange, HttpTransport};
pub use progress::{RateMeter, SlotCounters, SlotSnapshot};
pub use scheduler::part_path;
pub use throttle::BandwidthThrottle;
pub use transport::{
    PatchTransport, TransferError, TransferFuture, TransferProgress, TransferProgressCallback,
    TransferRequest,
};

pub(crate) use scheduler::DownloadScheduler;
