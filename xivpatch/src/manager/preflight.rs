//! Disk space checks run once before any network activity.
//!
//! Three constraints must hold, checked in this order:
//!
//! 1. the download volume fits the single largest pending patch,
//! 2. the download volume fits the first `window` pending patches together,
//! 3. the install volume fits every pending patch.
//!
//! The checks are a pure function of a [`SpaceRequirements`] and the free
//! space on both volumes, so they can be tested without real disks. Free
//! space itself comes from a [`FreeSpaceProbe`].

use std::path::{Component, Path, PathBuf, Prefix};

use sysinfo::Disks;
use tracing::{debug, info};

use super::error::{PatchError, PatchResult, SpaceConstraint};
use crate::patch::PatchCatalog;

/// Space the pending patches need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpaceRequirements {
    /// Size of the largest pending patch.
    pub largest: u64,
    /// Combined size of the first `window` pending patches.
    pub window: u64,
    /// Combined size of all pending patches.
    pub total: u64,
}

impl SpaceRequirements {
    /// Compute requirements from the catalog's pending tasks.
    pub fn from_catalog(catalog: &PatchCatalog, window: usize) -> Self {
        Self {
            largest: catalog.largest_pending(),
            window: catalog.pending_length(window),
            total: catalog.pending_length(usize::MAX),
        }
    }
}

/// Check the three space constraints.
pub fn check_space(
    requirements: &SpaceRequirements,
    free_download: u64,
    free_install: u64,
) -> PatchResult<()> {
    if free_download < requirements.largest {
        return Err(PatchError::insufficient_space(
            SpaceConstraint::DownloadLargest,
            requirements.largest,
            free_download,
        ));
    }

    if free_download < requirements.window {
        return Err(PatchError::insufficient_space(
            SpaceConstraint::DownloadWindow,
            requirements.window,
            free_download,
        ));
    }

    if free_install < requirements.total {
        return Err(PatchError::insufficient_space(
            SpaceConstraint::Install,
            requirements.total,
            free_install,
        ));
    }

    Ok(())
}

/// Source of free space figures for a path's volume.
pub trait FreeSpaceProbe: Send + Sync {
    /// Free bytes on the volume containing `path`.
    fn free_space(&self, path: &Path) -> PatchResult<u64>;
}

/// Probe backed by the operating system's mounted disk list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFreeSpace;

impl FreeSpaceProbe for SystemFreeSpace {
    fn free_space(&self, path: &Path) -> PatchResult<u64> {
        let resolved = resolve_existing(path);
        let disks = Disks::new_with_refreshed_list();

        // Longest mount point that prefixes the path wins.
        let mut best_len = 0usize;
        let mut available = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if volume_contains(mount, &resolved) {
                let len = mount.as_os_str().len();
                if available.is_none() || len >= best_len {
                    best_len = len;
                    available = Some(disk.available_space());
                }
            }
        }

        debug!(path = %resolved.display(), ?available, "Probed free space");

        available.ok_or_else(|| PatchError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no mounted volume contains this path",
            ),
        })
    }
}

/// Canonicalize the nearest existing ancestor, since the patch store may
/// not exist yet.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut current = Some(path);
    while let Some(candidate) = current {
        if let Ok(canonical) = std::fs::canonicalize(candidate) {
            return strip_verbatim(&canonical);
        }
        current = candidate.parent();
    }
    path.to_path_buf()
}

/// Whether `path` lies on the volume mounted at `mount`.
fn volume_contains(mount: &Path, path: &Path) -> bool {
    strip_verbatim(path).starts_with(strip_verbatim(mount))
}

/// Rewrite `\\?\C:\..` and `\\?\UNC\..` as `C:\..` and `\\server\share\..`.
///
/// Canonical paths on Windows carry the verbatim prefix while mount points
/// do not, and `Path::starts_with` treats the two prefixes as different.
fn strip_verbatim(path: &Path) -> PathBuf {
    let mut components = path.components();
    let Some(Component::Prefix(prefix)) = components.next() else {
        return path.to_path_buf();
    };
    let rest = components.as_path();
    match prefix.kind() {
        Prefix::VerbatimDisk(letter) => {
            PathBuf::from(format!("{}:{}", letter as char, rest.display()))
        }
        Prefix::VerbatimUNC(server, share) => PathBuf::from(format!(
            r"\\{}\{}{}",
            server.to_string_lossy(),
            share.to_string_lossy(),
            rest.display()
        )),
        _ => path.to_path_buf(),
    }
}

/// Run the preflight for a catalog.
pub fn run_preflight(
    catalog: &PatchCatalog,
    window: usize,
    patch_store: &Path,
    game_path: &Path,
    probe: &dyn FreeSpaceProbe,
) -> PatchResult<()> {
    let requirements = SpaceRequirements::from_catalog(catalog, window);
    let free_download = probe.free_space(patch_store)?;
    let free_install = probe.free_space(game_path)?;

    info!(
        largest = requirements.largest,
        window = requirements.window,
        total = requirements.total,
        free_download,
        free_install,
        "Checking free space"
    );

    check_space(&requirements, free_download, free_install)
}

/// Format a byte count with binary units, e.g. `1.50 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(largest: u64, window: u64, total: u64) -> SpaceRequirements {
        SpaceRequirements {
            largest,
            window,
            total,
        }
    }

    fn constraint_of(result: PatchResult<()>) -> Option<SpaceConstraint> {
        match result {
            Err(PatchError::InsufficientSpace(shortfall)) => Some(shortfall.constraint),
            _ => None,
        }
    }

    #[test]
    fn test_enough_space_passes() {
        assert!(check_space(&requirements(40, 60, 100), 60, 100).is_ok());
    }

    #[test]
    fn test_largest_patch_checked_first() {
        // Plenty of space overall, but the single largest patch does not fit.
        let result = check_space(&requirements(50, 50, 50), 49, 1_000_000);
        assert_eq!(constraint_of(result), Some(SpaceConstraint::DownloadLargest));
    }

    #[test]
    fn test_window_constraint() {
        let result = check_space(&requirements(10, 60, 100), 50, 1000);
        assert_eq!(constraint_of(result), Some(SpaceConstraint::DownloadWindow));
    }

    #[test]
    fn test_install_constraint() {
        let result = check_space(&requirements(10, 60, 100), 1000, 99);
        assert_eq!(constraint_of(result), Some(SpaceConstraint::Install));
    }

    #[test]
    fn test_shortfall_reports_amounts() {
        match check_space(&requirements(10, 60, 100), 1000, 99) {
            Err(PatchError::InsufficientSpace(shortfall)) => {
                assert_eq!(shortfall.required, 100);
                assert_eq!(shortfall.available, 99);
            }
            other => panic!("Expected InsufficientSpace, got {:?}", other),
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn test_resolve_existing_walks_up() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("not/yet/created");
        let resolved = resolve_existing(&missing);
        assert_eq!(resolved, std::fs::canonicalize(temp.path()).unwrap());
    }

    #[test]
    fn test_volume_contains_plain_paths() {
        assert!(volume_contains(Path::new("/"), Path::new("/home/user/patches")));
        assert!(volume_contains(
            Path::new("/mnt/games"),
            Path::new("/mnt/games/ffxiv")
        ));
        assert!(!volume_contains(
            Path::new("/mnt/games"),
            Path::new("/mnt/gamesdata/ffxiv")
        ));
    }

    #[test]
    fn test_strip_verbatim_leaves_plain_paths() {
        let path = Path::new("/var/lib/patches");
        assert_eq!(strip_verbatim(path), path);
    }

    #[cfg(windows)]
    #[test]
    fn test_volume_contains_verbatim_disk() {
        let canonical = Path::new(r"\\?\C:\Games\patches");
        assert_eq!(strip_verbatim(canonical), Path::new(r"C:\Games\patches"));
        assert!(volume_contains(Path::new(r"C:\"), canonical));
        assert!(volume_contains(Path::new(r"C:\"), Path::new(r"C:\Games")));
        assert!(!volume_contains(Path::new(r"D:\"), canonical));
    }

    #[cfg(windows)]
    #[test]
    fn test_strip_verbatim_unc() {
        let canonical = Path::new(r"\\?\UNC\nas\games\patches");
        assert_eq!(
            strip_verbatim(canonical),
            Path::new(r"\\nas\games\patches")
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn largest_patch_never_fits_means_failure(
                largest in 1u64..1_000_000,
                shortfall in 1u64..1000,
            ) {
                let free = largest.saturating_sub(shortfall);
                let reqs = requirements(largest, largest, largest);
                let result = check_space(&reqs, free, u64::MAX);
                prop_assert_eq!(constraint_of(result), Some(SpaceConstraint::DownloadLargest));
            }

            #[test]
            fn enough_space_always_passes(
                largest in 0u64..1000,
                extra_window in 0u64..1000,
                extra_total in 0u64..1000,
            ) {
                let window = largest + extra_window;
                let total = window + extra_total;
                let reqs = requirements(largest, window, total);
                prop_assert!(check_space(&reqs, window, total).is_ok());
            }
        }
    }
}
