//! Shared command setup: configuration and logging.

use tracing::info;
use xivpatch::config::{default_log_dir, ConfigFile};
use xivpatch::logging::{self, LogGuard, DEFAULT_FILTER};

use crate::error::CliError;

const VERBOSE_FILTER: &str = "debug,hyper=info,reqwest=info";

/// Loaded configuration plus the logging guard, alive for one command.
pub struct CliRunner {
    config: ConfigFile,
    _log_guard: LogGuard,
}

impl CliRunner {
    /// Load the config file and install logging.
    ///
    /// With `console` off, logs only go to the rolling file.
    pub fn new(verbose: bool, console: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let filter = if verbose {
            VERBOSE_FILTER
        } else {
            DEFAULT_FILTER
        };
        let log_guard = logging::init(filter, console, Some(&default_log_dir()))?;

        Ok(Self {
            config,
            _log_guard: log_guard,
        })
    }

    /// Log the command being run.
    pub fn log_startup(&self, command: &str) {
        info!(
            version = xivpatch::VERSION,
            command,
            log_dir = %default_log_dir().display(),
            "XIVPatch starting"
        );
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }
}
