//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use xivpatch::config::ConfigFile;
use xivpatch::patch::{load_patch_list, PatchDescriptor};

use crate::error::CliError;

/// Resolve the game directory: CLI takes precedence, then config.
pub fn resolve_game_path(
    cli_game_path: Option<PathBuf>,
    config: &ConfigFile,
) -> Result<PathBuf, CliError> {
    cli_game_path
        .or_else(|| config.paths.game_path.clone())
        .ok_or_else(|| {
            CliError::Config(
                "No game directory configured. \
                 Set paths.game_path in config.ini or use --game-path"
                    .to_string(),
            )
        })
}

/// Resolve the patch store: CLI, then config, then the default location.
pub fn resolve_patch_store(cli_patch_store: Option<PathBuf>, config: &ConfigFile) -> PathBuf {
    cli_patch_store.unwrap_or_else(|| config.patch_store())
}

/// Load and validate the patch list.
pub fn load_descriptors(path: &Path) -> Result<Vec<PatchDescriptor>, CliError> {
    let descriptors = load_patch_list(path)?;
    if descriptors.is_empty() {
        println!("Patch list {} is empty.", path.display());
    }
    Ok(descriptors)
}
