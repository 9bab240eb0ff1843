//! Configuration for the patch manager.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of patches downloaded at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of patches the download volume must hold at once.
pub const DEFAULT_LOOKAHEAD_WINDOW: usize = 6;

/// Default number of byte ranges fetched in parallel per file.
pub const DEFAULT_CHUNKS_PER_FILE: usize = 8;

/// Default number of attempts per byte range.
pub const DEFAULT_RANGE_ATTEMPTS: u32 = 5;

/// User agent the patch servers expect.
pub const DEFAULT_USER_AGENT: &str = "FFXIV PATCH CLIENT";

/// Configuration for a [`PatchManager`](super::PatchManager) run.
#[derive(Debug, Clone)]
pub struct PatchManagerConfig {
    /// Root of the game installation patches are applied to.
    pub game_path: PathBuf,

    /// Directory downloaded patch files are stored in.
    pub patch_store: PathBuf,

    /// Number of download slots.
    pub concurrency: usize,

    /// Total download speed limit in bytes per second, shared evenly across
    /// slots. `0` disables the limit.
    pub speed_limit: u64,

    /// Number of leading patches the download volume must fit at once.
    pub lookahead_window: usize,

    /// Byte ranges fetched in parallel inside one slot.
    pub chunks_per_file: usize,

    /// Attempts per byte range before the transfer is declared failed.
    pub range_attempts: u32,

    /// Timeout for establishing a request and reading the next block.
    pub read_timeout: Duration,

    /// User agent sent with every request.
    pub user_agent: String,

    /// Whether the disk space checks run before starting.
    pub enforce_preflight: bool,

    /// Installer executable, when patches are applied by an external process.
    pub installer: Option<PathBuf>,
}

impl Default for PatchManagerConfig {
    fn default() -> Self {
        Self {
            game_path: PathBuf::from("."),
            patch_store: std::env::temp_dir().join("xivpatch-store"),
            concurrency: DEFAULT_CONCURRENCY,
            speed_limit: 0,
            lookahead_window: DEFAULT_LOOKAHEAD_WINDOW,
            chunks_per_file: DEFAULT_CHUNKS_PER_FILE,
            range_attempts: DEFAULT_RANGE_ATTEMPTS,
            read_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            enforce_preflight: true,
            installer: None,
        }
    }
}

impl PatchManagerConfig {
    /// Create a configuration for the given game and patch store paths.
    pub fn new(game_path: PathBuf, patch_store: PathBuf) -> Self {
        Self {
            game_path,
            patch_store,
            ..Default::default()
        }
    }

    /// Set the number of download slots (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the total speed limit in bytes per second.
    pub fn with_speed_limit(mut self, bytes_per_second: u64) -> Self {
        self.speed_limit = bytes_per_second;
        self
    }

    /// Set the preflight lookahead window.
    pub fn with_lookahead_window(mut self, window: usize) -> Self {
        self.lookahead_window = window;
        self
    }

    /// Set the number of parallel byte ranges per file (minimum 1).
    pub fn with_chunks_per_file(mut self, chunks: usize) -> Self {
        self.chunks_per_file = chunks.max(1);
        self
    }

    /// Set the per-request read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Enable or disable the preflight disk space checks.
    pub fn with_preflight(mut self, enforce: bool) -> Self {
        self.enforce_preflight = enforce;
        self
    }

    /// Set the installer executable.
    pub fn with_installer(mut self, executable: PathBuf) -> Self {
        self.installer = Some(executable);
        self
    }

    /// Speed limit for a single slot, or `None` when unlimited.
    ///
    /// The total limit is divided by the number of slots so that raising
    /// concurrency never raises total throughput.
    pub fn per_slot_speed_limit(&self) -> Option<u64> {
        if self.speed_limit == 0 {
            return None;
        }
        Some((self.speed_limit / self.concurrency.max(1) as u64).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PatchManagerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.lookahead_window, 6);
        assert_eq!(config.chunks_per_file, 8);
        assert_eq!(config.user_agent, "FFXIV PATCH CLIENT");
        assert!(config.enforce_preflight);
        assert_eq!(config.per_slot_speed_limit(), None);
    }

    #[test]
    fn test_builder_pattern() {
        let config = PatchManagerConfig::new(PathBuf::from("/game"), PathBuf::from("/patches"))
            .with_concurrency(2)
            .with_speed_limit(1_000_000)
            .with_lookahead_window(3)
            .with_chunks_per_file(4)
            .with_preflight(false)
            .with_installer(PathBuf::from("/opt/xivpatch/installer"));

        assert_eq!(config.game_path, PathBuf::from("/game"));
        assert_eq!(config.patch_store, PathBuf::from("/patches"));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.lookahead_window, 3);
        assert_eq!(config.chunks_per_file, 4);
        assert!(!config.enforce_preflight);
        assert_eq!(
            config.installer,
            Some(PathBuf::from("/opt/xivpatch/installer"))
        );
    }

    #[test]
    fn test_min_concurrency() {
        let config = PatchManagerConfig::default().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_speed_limit_split_across_slots() {
        let config = PatchManagerConfig::default()
            .with_concurrency(4)
            .with_speed_limit(4_000_000);
        assert_eq!(config.per_slot_speed_limit(), Some(1_000_000));

        let doubled = config.clone().with_concurrency(8);
        assert_eq!(doubled.per_slot_speed_limit(), Some(500_000));
    }
}
