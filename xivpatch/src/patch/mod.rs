//! Patch list data model.
//!
//! - [`PatchDescriptor`]: immutable server-side description of one patch
//! - [`Repository`]: which game component a patch applies to
//! - [`PatchCatalog`] / [`PatchTask`]: ordered tasks with lifecycle state

mod catalog;
mod descriptor;

pub use catalog::{PatchCatalog, PatchState, PatchTask};
pub use descriptor::{load_patch_list, parse_patch_list, PatchDescriptor, Repository};
