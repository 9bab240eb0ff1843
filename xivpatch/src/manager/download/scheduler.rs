//! Download scheduler.
//!
//! One worker runs per download slot. A worker claims the next pending task
//! in catalog order, fetches it into `<file>.part`, verifies the block
//! hashes, renames it into place and marks the task `Downloaded`, then
//! claims again. Because a task is only claimed by an idle worker, at most
//! `concurrency` tasks are ever `Downloading`.
//!
//! ```text
//!            ┌──────────── PatchCatalog ────────────┐
//!            │ 0 Downloaded  1 Downloading  2 Pending│
//!            └──────▲──────────────▲──────────────────┘
//!   claim_next()    │              │
//!            ┌──────┴───┐    ┌─────┴────┐
//!            │ slot 0   │    │ slot 1   │   ... K workers
//!            └──────────┘    └──────────┘
//! ```
//!
//! The first failure is raised on the [`ShutdownSignal`], which cancels the
//! remaining transfers. Transfers that end because of that cancellation do
//! not raise anything.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use super::progress::SlotCounters;
use super::transport::{PatchTransport, TransferProgress, TransferRequest};
use crate::manager::error::{PatchError, PatchResult};
use crate::manager::shutdown::ShutdownSignal;
use crate::manager::verify::verify_blocks_async;
use crate::patch::{PatchCatalog, PatchState, PatchTask};

/// Temporary path a patch is downloaded to before verification.
pub fn part_path(file: &Path) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Runs the download slots for one patch run.
pub(crate) struct DownloadScheduler<'a> {
    catalog: &'a PatchCatalog,
    slots: &'a SlotCounters,
    transport: &'a dyn PatchTransport,
    shutdown: &'a ShutdownSignal,
    speed_limit: Option<u64>,
}

impl<'a> DownloadScheduler<'a> {
    pub(crate) fn new(
        catalog: &'a PatchCatalog,
        slots: &'a SlotCounters,
        transport: &'a dyn PatchTransport,
        shutdown: &'a ShutdownSignal,
        speed_limit: Option<u64>,
    ) -> Self {
        Self {
            catalog,
            slots,
            transport,
            shutdown,
            speed_limit,
        }
    }

    /// Run every slot until no pending task remains or the run ends.
    pub(crate) async fn run(&self) {
        info!(
            slots = self.slots.len(),
            patches = self.catalog.count(PatchState::Pending),
            "Starting downloads"
        );

        join_all((0..self.slots.len()).map(|slot| self.run_slot(slot))).await;

        debug!("All download slots idle");
    }

    async fn run_slot(&self, slot: usize) {
        while !self.shutdown.is_cancelled() {
            let Some(task) = self.catalog.claim_next() else {
                break;
            };

            self.slots.bind(slot, task.index());
            let result = self.download(slot, task).await;

            let stop = match result {
                Ok(()) => {
                    task.transition(PatchState::Downloading, PatchState::Downloaded);
                    info!(
                        slot,
                        index = task.index(),
                        version = %task.descriptor().version_id,
                        "Patch downloaded"
                    );
                    false
                }
                Err(e) if e.is_cancelled() => {
                    debug!(slot, index = task.index(), "Download cancelled");
                    true
                }
                Err(e) => {
                    error!(slot, index = task.index(), error = %e, "Download failed");
                    self.shutdown.raise(e);
                    true
                }
            };

            self.slots.release(slot);

            if stop {
                break;
            }
        }
    }

    async fn download(&self, slot: usize, task: &PatchTask) -> PatchResult<()> {
        let descriptor = task.descriptor();
        let file = task.file();

        if self.is_already_downloaded(task).await? {
            info!(version = %descriptor.version_id, "Patch already on disk, skipping download");
            self.slots.record(slot, descriptor.length, 0.0);
            return Ok(());
        }

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PatchError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let part = part_path(file);
        let on_progress =
            |p: TransferProgress| self.slots.record(slot, p.received_bytes, p.bytes_per_second);
        let request = TransferRequest {
            url: &descriptor.url,
            destination: &part,
            expected_length: descriptor.length,
            speed_limit: self.speed_limit,
        };

        debug!(slot, url = %descriptor.url, part = %part.display(), "Fetching patch");

        if let Err(e) = self
            .transport
            .fetch(request, &on_progress, self.shutdown.child_token())
            .await
        {
            remove_quietly(&part).await;
            if e.is_cancelled() {
                return Err(PatchError::Cancelled);
            }
            return Err(PatchError::TransportFailure {
                version_id: descriptor.version_id.clone(),
                source: e,
            });
        }

        if !verify_blocks_async(&part, descriptor).await? {
            remove_quietly(&part).await;
            return Err(PatchError::IntegrityFailure {
                version_id: descriptor.version_id.clone(),
                path: part,
            });
        }

        tokio::fs::rename(&part, file)
            .await
            .map_err(|e| PatchError::Io {
                path: file.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Whether a verified copy of the patch is already in the store.
    async fn is_already_downloaded(&self, task: &PatchTask) -> PatchResult<bool> {
        let file = task.file();
        let descriptor = task.descriptor();

        let Ok(metadata) = tokio::fs::metadata(file).await else {
            return Ok(false);
        };
        if metadata.len() != descriptor.length {
            debug!(
                file = %file.display(),
                on_disk = metadata.len(),
                expected = descriptor.length,
                "Stale patch file, downloading again"
            );
            return Ok(false);
        }

        let valid = verify_blocks_async(file, descriptor).await?;
        if !valid {
            warn!(file = %file.display(), "Existing patch file is corrupt, downloading again");
        }
        Ok(valid)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::manager::download::transport::{TransferError, TransferFuture};
    use crate::manager::verify::HashAlgorithm;
    use crate::patch::PatchDescriptor;

    /// Serves bodies from memory, optionally corrupting them.
    #[derive(Default)]
    struct MemoryTransport {
        bodies: HashMap<String, Vec<u8>>,
        corrupt: bool,
        fetches: AtomicUsize,
    }

    impl PatchTransport for MemoryTransport {
        fn fetch<'a>(
            &'a self,
            request: TransferRequest<'a>,
            on_progress: &'a (dyn Fn(TransferProgress) + Send + Sync),
            cancel: CancellationToken,
        ) -> TransferFuture<'a> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                if cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                let mut body = self
                    .bodies
                    .get(request.url)
                    .cloned()
                    .ok_or_else(|| TransferError::Status {
                        url: request.url.to_string(),
                        status: 404,
                    })?;
                if self.corrupt {
                    body[0] ^= 0xFF;
                }
                tokio::fs::write(request.destination, &body)
                    .await
                    .map_err(|e| TransferError::Write {
                        path: request.destination.to_path_buf(),
                        source: e,
                    })?;
                on_progress(TransferProgress {
                    received_bytes: body.len() as u64,
                    bytes_per_second: 0.0,
                });
                Ok(body.len() as u64)
            })
        }
    }

    fn descriptor(name: &str, content: &[u8]) -> PatchDescriptor {
        PatchDescriptor {
            version_id: name.to_string(),
            url: format!("http://patch-dl.example.com/game/{}.patch", name),
            length: content.len() as u64,
            hash_type: "sha1".to_string(),
            hash_block_size: 4,
            hashes: content
                .chunks(4)
                .map(|c| HashAlgorithm::Sha1.hex_digest(c))
                .collect(),
        }
    }

    struct Fixture {
        _temp: TempDir,
        catalog: PatchCatalog,
        transport: MemoryTransport,
    }

    fn fixture(patches: &[(&str, &[u8])]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let descriptors: Vec<_> = patches.iter().map(|(n, c)| descriptor(n, c)).collect();
        let transport = MemoryTransport {
            bodies: descriptors
                .iter()
                .zip(patches)
                .map(|(d, (_, c))| (d.url.clone(), c.to_vec()))
                .collect(),
            ..Default::default()
        };
        let catalog = PatchCatalog::new(descriptors, temp.path()).unwrap();
        Fixture {
            _temp: temp,
            catalog,
            transport,
        }
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/store/game/a.patch")),
            PathBuf::from("/store/game/a.patch.part")
        );
    }

    #[tokio::test]
    async fn test_downloads_every_patch() {
        let f = fixture(&[("a", b"AAAAAAAAA"), ("b", b"BBBB"), ("c", b"CC")]);
        let slots = SlotCounters::new(2);
        let shutdown = ShutdownSignal::new();

        DownloadScheduler::new(&f.catalog, &slots, &f.transport, &shutdown, None)
            .run()
            .await;

        assert_eq!(f.catalog.count(PatchState::Downloaded), 3);
        for task in f.catalog.iter() {
            assert!(task.file().exists());
            assert!(!part_path(task.file()).exists());
        }
        assert!(slots.snapshot().iter().all(|s| s.task.is_none()));
        assert!(shutdown.take_error().is_none());
    }

    #[tokio::test]
    async fn test_existing_verified_file_is_not_fetched() {
        let f = fixture(&[("a", b"ABCDEFGHI")]);
        let task = f.catalog.get(0).unwrap();
        std::fs::create_dir_all(task.file().parent().unwrap()).unwrap();
        std::fs::write(task.file(), b"ABCDEFGHI").unwrap();

        let slots = SlotCounters::new(1);
        let shutdown = ShutdownSignal::new();
        DownloadScheduler::new(&f.catalog, &slots, &f.transport, &shutdown, None)
            .run()
            .await;

        assert_eq!(task.state(), PatchState::Downloaded);
        assert_eq!(f.transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupt_existing_file_is_refetched() {
        let f = fixture(&[("a", b"ABCDEFGHI")]);
        let task = f.catalog.get(0).unwrap();
        std::fs::create_dir_all(task.file().parent().unwrap()).unwrap();
        std::fs::write(task.file(), b"ABCDEFGHX").unwrap();

        let slots = SlotCounters::new(1);
        let shutdown = ShutdownSignal::new();
        DownloadScheduler::new(&f.catalog, &slots, &f.transport, &shutdown, None)
            .run()
            .await;

        assert_eq!(task.state(), PatchState::Downloaded);
        assert_eq!(f.transport.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(task.file()).unwrap(), b"ABCDEFGHI");
    }

    #[tokio::test]
    async fn test_integrity_failure_raises_and_removes_file() {
        let mut f = fixture(&[("a", b"ABCDEFGHI"), ("b", b"BBBB")]);
        f.transport.corrupt = true;

        let slots = SlotCounters::new(1);
        let shutdown = ShutdownSignal::new();
        DownloadScheduler::new(&f.catalog, &slots, &f.transport, &shutdown, None)
            .run()
            .await;

        let task = f.catalog.get(0).unwrap();
        assert!(!task.file().exists());
        assert!(!part_path(task.file()).exists());
        match shutdown.take_error() {
            Some(PatchError::IntegrityFailure { path, .. }) => {
                assert_eq!(path, part_path(task.file()));
            }
            other => panic!("Expected IntegrityFailure, got {:?}", other),
        }
        // The single slot stopped, so the second patch was never claimed.
        assert_eq!(f.catalog.get(1).unwrap().state(), PatchState::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_run_claims_nothing() {
        let f = fixture(&[("a", b"AAAA")]);
        let slots = SlotCounters::new(1);
        let shutdown = ShutdownSignal::new();
        shutdown.cancel();

        DownloadScheduler::new(&f.catalog, &slots, &f.transport, &shutdown, None)
            .run()
            .await;

        assert_eq!(f.catalog.count(PatchState::Pending), 1);
        assert!(shutdown.take_error().is_none());
    }
}
