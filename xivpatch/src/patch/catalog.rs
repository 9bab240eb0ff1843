//! Ordered patch catalog with per-task lifecycle state.
//!
//! The catalog is built once from the resolved patch list and never resized.
//! Each [`PatchTask`] keeps its state in a `watch` channel: the channel's
//! internal lock serialises writers, and waiters (the install sequencer)
//! are woken on every transition instead of polling.
//!
//! ```text
//! Pending ──► Downloading ──► Downloaded ──► Installing ──► Completed
//!    │             │              │              │
//!    └─────────────┴──────────────┴──────────────┴──────► Failed (sink)
//! ```
//!
//! `Pending → Downloading → Downloaded` belongs to the download scheduler,
//! `Downloaded → Installing → Completed` to the install sequencer.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::watch;

use super::descriptor::{PatchDescriptor, Repository};
use crate::manager::PatchResult;

/// Lifecycle state of one patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchState {
    /// Waiting for a download slot.
    Pending,
    /// Bound to a slot and transferring.
    Downloading,
    /// On disk and verified, waiting for its turn to install.
    Downloaded,
    /// Handed to the installer.
    Installing,
    /// Applied to the game installation.
    Completed,
    /// The run ended before this patch completed.
    Failed,
}

impl PatchState {
    /// Short name for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchState::Pending => "pending",
            PatchState::Downloading => "downloading",
            PatchState::Downloaded => "downloaded",
            PatchState::Installing => "installing",
            PatchState::Completed => "completed",
            PatchState::Failed => "failed",
        }
    }

    /// Whether the patch still needs network transfer.
    pub fn is_awaiting_download(&self) -> bool {
        matches!(self, PatchState::Pending | PatchState::Downloading)
    }
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One patch descriptor plus its mutable lifecycle state.
#[derive(Debug)]
pub struct PatchTask {
    index: usize,
    descriptor: PatchDescriptor,
    file: PathBuf,
    state: watch::Sender<PatchState>,
}

impl PatchTask {
    fn new(index: usize, descriptor: PatchDescriptor, file: PathBuf) -> Self {
        let (state, _) = watch::channel(PatchState::Pending);
        Self {
            index,
            descriptor,
            file,
            state,
        }
    }

    /// Position in the catalog, which is also the install order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The immutable descriptor.
    pub fn descriptor(&self) -> &PatchDescriptor {
        &self.descriptor
    }

    /// Repository classification of this patch.
    pub fn repository(&self) -> Repository {
        self.descriptor.repository()
    }

    /// Final on-disk location of the patch file.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Current state.
    pub fn state(&self) -> PatchState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<PatchState> {
        self.state.subscribe()
    }

    /// Move from `from` to `to` atomically.
    ///
    /// Returns `false` and leaves the state untouched if the task is not in
    /// `from`.
    pub(crate) fn transition(&self, from: PatchState, to: PatchState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Sink every unfinished state into `Failed`.
    pub(crate) fn fail(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, PatchState::Completed | PatchState::Failed) {
                false
            } else {
                *state = PatchState::Failed;
                true
            }
        })
    }
}

/// Ordered, fixed-size collection of patch tasks.
#[derive(Debug)]
pub struct PatchCatalog {
    tasks: Vec<PatchTask>,
}

impl PatchCatalog {
    /// Build the catalog, placing each patch file under `patch_store`.
    pub fn new(descriptors: Vec<PatchDescriptor>, patch_store: &Path) -> PatchResult<Self> {
        let mut tasks = Vec::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            descriptor.validate()?;
            let file = patch_store.join(descriptor.relative_path()?);
            tasks.push(PatchTask::new(index, descriptor, file));
        }

        Ok(Self { tasks })
    }

    /// Number of patches.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the catalog has no patches.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task at a catalog position.
    pub fn get(&self, index: usize) -> Option<&PatchTask> {
        self.tasks.get(index)
    }

    /// All tasks in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &PatchTask> {
        self.tasks.iter()
    }

    /// Claim the first pending task in catalog order for download.
    ///
    /// Safe to call from several slots at once: each task is handed out at
    /// most once.
    pub(crate) fn claim_next(&self) -> Option<&PatchTask> {
        self.tasks
            .iter()
            .find(|task| task.transition(PatchState::Pending, PatchState::Downloading))
    }

    /// Number of tasks currently in `state`.
    pub fn count(&self, state: PatchState) -> usize {
        self.tasks.iter().filter(|t| t.state() == state).count()
    }

    /// Whether any task is still waiting for a slot.
    pub fn has_pending(&self) -> bool {
        self.tasks.iter().any(|t| t.state() == PatchState::Pending)
    }

    /// Whether every task has left the download phase.
    pub fn downloads_finished(&self) -> bool {
        !self.tasks.iter().any(|t| t.state().is_awaiting_download())
    }

    /// Total size of the first `take` tasks that still need downloading.
    pub fn pending_length(&self, take: usize) -> u64 {
        self.tasks
            .iter()
            .take(take)
            .filter(|t| t.state().is_awaiting_download())
            .map(|t| t.descriptor.length)
            .sum()
    }

    /// Size of the largest task that still needs downloading.
    pub fn largest_pending(&self) -> u64 {
        self.tasks
            .iter()
            .filter(|t| t.state().is_awaiting_download())
            .map(|t| t.descriptor.length)
            .max()
            .unwrap_or(0)
    }

    /// Mark every unfinished task as failed. Returns how many changed.
    pub(crate) fn fail_unfinished(&self) -> usize {
        self.tasks.iter().filter(|t| t.fail()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, length: u64) -> PatchDescriptor {
        PatchDescriptor {
            version_id: name.to_string(),
            url: format!("http://patch-dl.example.com/game/{}.patch", name),
            length,
            hash_type: "sha1".to_string(),
            hash_block_size: 4,
            hashes: vec!["00".to_string(); length.div_ceil(4) as usize],
        }
    }

    fn catalog(sizes: &[u64]) -> PatchCatalog {
        let descriptors = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| descriptor(&format!("p{}", i), *size))
            .collect();
        PatchCatalog::new(descriptors, Path::new("/store")).unwrap()
    }

    #[test]
    fn test_catalog_new_places_files_in_store() {
        let catalog = catalog(&[10, 20]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.get(1).unwrap().file(),
            Path::new("/store/game/p1.patch")
        );
        assert_eq!(catalog.count(PatchState::Pending), 2);
    }

    #[test]
    fn test_claim_next_follows_catalog_order() {
        let catalog = catalog(&[10, 20, 5]);

        assert_eq!(catalog.claim_next().unwrap().index(), 0);
        assert_eq!(catalog.claim_next().unwrap().index(), 1);
        assert_eq!(catalog.claim_next().unwrap().index(), 2);
        assert!(catalog.claim_next().is_none());
        assert_eq!(catalog.count(PatchState::Downloading), 3);
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let catalog = catalog(&[10]);
        let task = catalog.get(0).unwrap();

        assert!(!task.transition(PatchState::Downloading, PatchState::Downloaded));
        assert_eq!(task.state(), PatchState::Pending);

        assert!(task.transition(PatchState::Pending, PatchState::Downloading));
        assert!(task.transition(PatchState::Downloading, PatchState::Downloaded));
        assert_eq!(task.state(), PatchState::Downloaded);
    }

    #[test]
    fn test_fail_is_a_sink() {
        let catalog = catalog(&[10, 20]);
        let done = catalog.get(0).unwrap();
        for (from, to) in [
            (PatchState::Pending, PatchState::Downloading),
            (PatchState::Downloading, PatchState::Downloaded),
            (PatchState::Downloaded, PatchState::Installing),
            (PatchState::Installing, PatchState::Completed),
        ] {
            assert!(done.transition(from, to));
        }

        assert_eq!(catalog.fail_unfinished(), 1);
        assert_eq!(done.state(), PatchState::Completed);

        let failed = catalog.get(1).unwrap();
        assert_eq!(failed.state(), PatchState::Failed);
        assert!(!failed.transition(PatchState::Pending, PatchState::Downloading));
    }

    #[test]
    fn test_pending_lengths() {
        let catalog = catalog(&[10, 20, 5, 40]);
        assert_eq!(catalog.largest_pending(), 40);
        assert_eq!(catalog.pending_length(2), 30);
        assert_eq!(catalog.pending_length(usize::MAX), 75);

        let first = catalog.claim_next().unwrap();
        assert!(first.transition(PatchState::Downloading, PatchState::Downloaded));
        assert_eq!(catalog.pending_length(2), 20);
        assert!(!catalog.downloads_finished());
    }

    #[tokio::test]
    async fn test_subscribe_observes_transitions() {
        let catalog = catalog(&[10]);
        let task = catalog.get(0).unwrap();
        let mut rx = task.subscribe();

        task.transition(PatchState::Pending, PatchState::Downloading);
        task.transition(PatchState::Downloading, PatchState::Downloaded);

        let state = *rx
            .wait_for(|s| *s == PatchState::Downloaded)
            .await
            .unwrap();
        assert_eq!(state, PatchState::Downloaded);
    }
}
