//! Preflight command - report the disk space a patch run needs.

use std::path::PathBuf;

use console::style;
use xivpatch::manager::{
    check_space, format_bytes, FreeSpaceProbe, SpaceRequirements, SystemFreeSpace,
    DEFAULT_LOOKAHEAD_WINDOW,
};
use xivpatch::patch::PatchCatalog;

use super::common::{load_descriptors, resolve_game_path, resolve_patch_store};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the preflight command.
pub struct PreflightArgs {
    pub patch_list: PathBuf,
    pub game_path: Option<PathBuf>,
    pub patch_store: Option<PathBuf>,
}

/// Run the preflight command.
pub fn run(runner: &CliRunner, args: PreflightArgs) -> Result<(), CliError> {
    runner.log_startup("preflight");
    let config = runner.config();

    let descriptors = load_descriptors(&args.patch_list)?;
    let game_path = resolve_game_path(args.game_path, config)?;
    let patch_store = resolve_patch_store(args.patch_store, config);

    let catalog = PatchCatalog::new(descriptors, &patch_store)?;
    let requirements = SpaceRequirements::from_catalog(&catalog, DEFAULT_LOOKAHEAD_WINDOW);

    let probe = SystemFreeSpace;
    let free_download = probe.free_space(&patch_store)?;
    let free_install = probe.free_space(&game_path)?;

    println!("Disk Space");
    println!("==========");
    println!();
    println!(
        "Patch store {} ({} free)",
        patch_store.display(),
        format_bytes(free_download)
    );
    print_row("Largest patch", requirements.largest, free_download);
    print_row(
        &format!("Next {} patches", DEFAULT_LOOKAHEAD_WINDOW),
        requirements.window,
        free_download,
    );
    println!();
    println!(
        "Game {} ({} free)",
        game_path.display(),
        format_bytes(free_install)
    );
    print_row("All patches", requirements.total, free_install);
    println!();

    check_space(&requirements, free_download, free_install)?;
    println!("Enough space to patch.");
    Ok(())
}

fn print_row(label: &str, required: u64, available: u64) {
    let mark = if available >= required {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!("  {} {:<16} {}", mark, label, format_bytes(required));
}
