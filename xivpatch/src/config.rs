//! Persistent settings stored in an INI file.
//!
//! The file lives at `<config dir>/xivpatch/config.ini`:
//!
//! ```ini
//! [paths]
//! game_path = /games/ffxiv
//! patch_store = /data/xivpatch/patches
//! installer = /opt/xivpatch/xivpatch-installer
//!
//! [download]
//! concurrency = 4
//! speed_limit = 0
//! chunks = 8
//! ```
//!
//! A missing file yields the defaults. Command line flags override values
//! read from the file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

use crate::manager::{PatchManagerConfig, DEFAULT_CHUNKS_PER_FILE, DEFAULT_CONCURRENCY};

const SECTION_PATHS: &str = "paths";
const SECTION_DOWNLOAD: &str = "download";

/// Errors reading or writing the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or parsed.
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// The file could not be written.
    #[error("failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A value could not be parsed.
    #[error("invalid value '{value}' for {section}.{key}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },

    /// No setting has this name.
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    /// The platform has no config directory.
    #[error("could not determine the configuration directory")]
    NoConfigDir,
}

/// Directory holding xivpatch's configuration.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("xivpatch"))
}

/// Path of the config file.
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.ini"))
}

/// Default patch store, under the local data directory.
pub fn default_patch_store() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("xivpatch")
        .join("patches")
}

/// Default log directory, under the local data directory.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("xivpatch")
        .join("logs")
}

/// `[paths]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSettings {
    /// Game installation root.
    pub game_path: Option<PathBuf>,
    /// Where downloaded patches are kept.
    pub patch_store: Option<PathBuf>,
    /// Installer executable.
    pub installer: Option<PathBuf>,
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Patches downloaded at once.
    pub concurrency: usize,
    /// Total speed limit in bytes per second, `0` for none.
    pub speed_limit: u64,
    /// Parallel byte ranges per patch.
    pub chunks: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            speed_limit: 0,
            chunks: DEFAULT_CHUNKS_PER_FILE,
        }
    }
}

/// Contents of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub paths: PathSettings,
    pub download: DownloadSettings,
}

impl ConfigFile {
    /// Load from the default location, or defaults if there is no file.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<memory>"),
            source: ini::Error::Parse(e),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for key in ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|section| section.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }

        Ok(config)
    }

    /// Render as INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_file_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        self.to_ini().write_to_file(path).map_err(write_error)
    }

    /// Patch store from the file, or the default.
    pub fn patch_store(&self) -> PathBuf {
        self.paths
            .patch_store
            .clone()
            .unwrap_or_else(default_patch_store)
    }

    /// Apply the `[download]` settings to a manager configuration.
    pub fn apply_download_settings(&self, config: PatchManagerConfig) -> PatchManagerConfig {
        let config = config
            .with_concurrency(self.download.concurrency)
            .with_speed_limit(self.download.speed_limit)
            .with_chunks_per_file(self.download.chunks);

        match &self.paths.installer {
            Some(installer) => config.with_installer(installer.clone()),
            None => config,
        }
    }
}

/// A single setting addressable as `section.key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    GamePath,
    PatchStore,
    Installer,
    Concurrency,
    SpeedLimit,
    Chunks,
}

impl ConfigKey {
    /// Every key, in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::GamePath,
            ConfigKey::PatchStore,
            ConfigKey::Installer,
            ConfigKey::Concurrency,
            ConfigKey::SpeedLimit,
            ConfigKey::Chunks,
        ]
    }

    /// Section the key lives in.
    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::GamePath | ConfigKey::PatchStore | ConfigKey::Installer => SECTION_PATHS,
            ConfigKey::Concurrency | ConfigKey::SpeedLimit | ConfigKey::Chunks => SECTION_DOWNLOAD,
        }
    }

    /// Key name within its section.
    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::GamePath => "game_path",
            ConfigKey::PatchStore => "patch_store",
            ConfigKey::Installer => "installer",
            ConfigKey::Concurrency => "concurrency",
            ConfigKey::SpeedLimit => "speed_limit",
            ConfigKey::Chunks => "chunks",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as text, empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        let path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        match self {
            ConfigKey::GamePath => path(&config.paths.game_path),
            ConfigKey::PatchStore => path(&config.paths.patch_store),
            ConfigKey::Installer => path(&config.paths.installer),
            ConfigKey::Concurrency => config.download.concurrency.to_string(),
            ConfigKey::SpeedLimit => config.download.speed_limit.to_string(),
            ConfigKey::Chunks => config.download.chunks.to_string(),
        }
    }

    /// Parse `value` and store it. An empty value clears a path.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let path = || {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        };
        let section = self.section();
        let key = self.key_name();

        match self {
            ConfigKey::GamePath => config.paths.game_path = path(),
            ConfigKey::PatchStore => config.paths.patch_store = path(),
            ConfigKey::Installer => config.paths.installer = path(),
            ConfigKey::Concurrency => {
                let concurrency: usize = parse_value(section, key, value)?;
                if concurrency == 0 {
                    return Err(ConfigError::InvalidValue {
                        section,
                        key,
                        value: value.to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
                config.download.concurrency = concurrency;
            }
            ConfigKey::SpeedLimit => {
                config.download.speed_limit = parse_value(section, key, value)?
            }
            ConfigKey::Chunks => config.download.chunks = parse_value(section, key, value)?,
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

fn parse_value<T>(section: &'static str, key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            section,
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
