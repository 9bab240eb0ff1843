//! `config` command: read and edit `config.ini` one key at a time.
//!
//! Keys are addressed as `section.key`, for example `download.concurrency`.
//! A file that fails to parse is reported and never rewritten.

use std::path::Path;

use clap::Subcommand;
use console::style;
use xivpatch::config::{config_file_path, ConfigError, ConfigFile, ConfigKey};

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one setting
    Get {
        /// Setting name, e.g. paths.game_path
        key: String,
    },

    /// Change one setting; an empty value clears a path
    Set {
        /// Setting name, e.g. download.concurrency
        key: String,
        value: String,
    },

    /// Print every setting
    List,

    /// Print where the config file lives
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    let path = config_file_path().ok_or(ConfigError::NoConfigDir)?;

    match command {
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Get { key } => {
            let value = get(&path, key.parse()?)?;
            println!("{}", display_value(&value));
        }
        ConfigCommands::Set { key, value } => {
            let key: ConfigKey = key.parse()?;
            let stored = set(&path, key, &value)?;
            println!("{} = {}", key.name(), display_value(&stored));
        }
        ConfigCommands::List => {
            println!("{}", style(path.display()).dim());
            for (key, value) in list(&path)? {
                println!("{:<22} {}", key.name(), display_value(&value));
            }
        }
    }
    Ok(())
}

fn get(path: &Path, key: ConfigKey) -> Result<String, CliError> {
    Ok(key.get(&ConfigFile::load_from(path)?))
}

/// Apply one change and write the file back. Returns the stored value.
fn set(path: &Path, key: ConfigKey, value: &str) -> Result<String, CliError> {
    let mut config = ConfigFile::load_from(path)?;
    key.set(&mut config, value)?;
    config.save_to(path)?;
    Ok(key.get(&config))
}

fn list(path: &Path) -> Result<Vec<(ConfigKey, String)>, CliError> {
    let config = ConfigFile::load_from(path)?;
    Ok(ConfigKey::all()
        .iter()
        .map(|key| (*key, key.get(&config)))
        .collect())
}

fn display_value(value: &str) -> String {
    if value.is_empty() {
        style("(not set)").dim().to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const SAVED: &str = "[paths]\ngame_path=/games/ffxiv\ninstaller=/opt/installer\n\n\
                         [download]\nconcurrency=3\n";

    #[test]
    fn test_set_keeps_other_settings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, SAVED).unwrap();

        let stored = set(&path, ConfigKey::SpeedLimit, "1048576").unwrap();
        assert_eq!(stored, "1048576");

        let reloaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(reloaded.download.speed_limit, 1_048_576);
        assert_eq!(reloaded.download.concurrency, 3);
        assert_eq!(
            reloaded.paths.game_path,
            Some(PathBuf::from("/games/ffxiv"))
        );
        assert_eq!(
            reloaded.paths.installer,
            Some(PathBuf::from("/opt/installer"))
        );
    }

    #[test]
    fn test_set_refuses_malformed_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        let malformed = "[paths]\ngame_path=/games/ffxiv\ninstaller=/opt/installer\n\n\
                         [download]\nchunks=lots\n";
        fs::write(&path, malformed).unwrap();

        let result = set(&path, ConfigKey::Concurrency, "2");
        assert!(matches!(
            result,
            Err(CliError::ConfigFile(ConfigError::InvalidValue { .. }))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), malformed);

        assert!(get(&path, ConfigKey::GamePath).is_err());
        assert!(list(&path).is_err());
    }

    #[test]
    fn test_invalid_value_leaves_file_untouched() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, SAVED).unwrap();

        assert!(set(&path, ConfigKey::Concurrency, "0").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), SAVED);
    }

    #[test]
    fn test_missing_file_lists_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");

        let listed = list(&path).unwrap();
        assert_eq!(listed.len(), ConfigKey::all().len());
        assert_eq!(get(&path, ConfigKey::GamePath).unwrap(), "");
        assert!(!path.exists());
    }

    #[test]
    fn test_unknown_key() {
        assert!(matches!(
            "download.threads".parse::<ConfigKey>(),
            Err(ConfigError::UnknownKey(_))
        ));
    }
}
