//! Verify command - check patch files against their block hashes.
//!
//! With a file argument, checks that one file against the descriptor named
//! by `--version`, or the descriptor whose URL ends in the file's name.
//! Without one, checks every patch of the list present in the patch store.

use std::path::{Path, PathBuf};

use console::style;
use xivpatch::manager::{format_bytes, verify_blocks, HashAlgorithm};
use xivpatch::patch::{PatchCatalog, PatchDescriptor};

use super::common::{load_descriptors, resolve_patch_store};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the verify command.
pub struct VerifyArgs {
    pub patch_list: PathBuf,
    pub patch_store: Option<PathBuf>,
    pub version_id: Option<String>,
    pub file: Option<PathBuf>,
}

/// Run the verify command.
pub fn run(runner: &CliRunner, args: VerifyArgs) -> Result<(), CliError> {
    runner.log_startup("verify");
    let descriptors = load_descriptors(&args.patch_list)?;

    match args.file {
        Some(file) => {
            let descriptor = find_descriptor(&descriptors, args.version_id.as_deref(), &file)
                .ok_or_else(|| CliError::UnknownPatchFile(file.clone()))?;
            let passed = check(&file, descriptor)?;
            summarize(1, usize::from(!passed))
        }
        None => {
            let store = resolve_patch_store(args.patch_store, runner.config());
            let catalog = PatchCatalog::new(descriptors, &store)?;
            println!("Checking patch store {}", store.display());
            println!();

            let mut checked = 0;
            let mut failed = 0;
            for task in catalog.iter() {
                if !task.file().exists() {
                    println!(
                        "  {} {} (not downloaded)",
                        style("-").dim(),
                        task.descriptor().version_id
                    );
                    continue;
                }
                checked += 1;
                if !check(task.file(), task.descriptor())? {
                    failed += 1;
                }
            }
            summarize(checked, failed)
        }
    }
}

/// Pick the descriptor for `file`, by version if given, else by file name.
fn find_descriptor<'a>(
    descriptors: &'a [PatchDescriptor],
    version_id: Option<&str>,
    file: &Path,
) -> Option<&'a PatchDescriptor> {
    match version_id {
        Some(version) => descriptors.iter().find(|d| d.version_id == version),
        None => {
            let name = file.file_name()?.to_str()?;
            descriptors
                .iter()
                .find(|d| d.url.rsplit('/').next() == Some(name))
        }
    }
}

fn check(file: &Path, descriptor: &PatchDescriptor) -> Result<bool, CliError> {
    if HashAlgorithm::from_tag(&descriptor.hash_type).is_none() {
        println!(
            "  {} {} uses unknown hash type '{}', not checked",
            style("?").yellow(),
            descriptor.version_id,
            descriptor.hash_type
        );
    }

    let passed = verify_blocks(file, descriptor)?;
    let mark = if passed {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!(
        "  {} {} ({}, {})",
        mark,
        descriptor.version_id,
        format_bytes(descriptor.length),
        file.display()
    );
    Ok(passed)
}

fn summarize(checked: usize, failed: usize) -> Result<(), CliError> {
    println!();
    if failed > 0 {
        return Err(CliError::Verification { checked, failed });
    }
    println!("{} patch files verified.", checked);
    Ok(())
}
