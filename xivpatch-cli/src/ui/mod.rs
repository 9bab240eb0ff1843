//! Terminal output for XIVPatch.
//!
//! - `progress` - live download and install progress bars

pub mod progress;

pub use progress::{PatchLabels, ProgressDisplay};
