//! XIVPatch CLI - Command-line interface
//!
//! Downloads, verifies and installs game patches from a resolved patch list.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;

mod commands;
mod error;
mod runner;
mod ui;

use commands::config::ConfigCommands;
use commands::install::InstallArgs;
use commands::preflight::PreflightArgs;
use commands::verify::VerifyArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "xivpatch")]
#[command(version, about = "Download, verify and install game patches in order", long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download every patch in the list and install them in order
    Install {
        /// Patch list as a JSON array of patch descriptors
        #[arg(long, value_name = "FILE")]
        patch_list: PathBuf,

        /// Game installation directory (overrides paths.game_path)
        #[arg(long, value_name = "DIR")]
        game_path: Option<PathBuf>,

        /// Directory downloaded patches are kept in (overrides paths.patch_store)
        #[arg(long, value_name = "DIR")]
        patch_store: Option<PathBuf>,

        /// Installer executable (overrides paths.installer)
        #[arg(long, value_name = "FILE")]
        installer: Option<PathBuf>,

        /// Patches downloaded at once (overrides download.concurrency)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Total download limit in bytes per second, 0 for none
        #[arg(long, value_name = "BYTES")]
        speed_limit: Option<u64>,

        /// Skip the free space checks
        #[arg(long)]
        no_preflight: bool,
    },

    /// Check patch files against their block hashes
    Verify {
        /// Patch list as a JSON array of patch descriptors
        #[arg(long, value_name = "FILE")]
        patch_list: PathBuf,

        /// Directory downloaded patches are kept in (overrides paths.patch_store)
        #[arg(long, value_name = "DIR")]
        patch_store: Option<PathBuf>,

        /// Version of the patch to check FILE against
        #[arg(long = "version", value_name = "VERSION", requires = "file")]
        version_id: Option<String>,

        /// Single file to check; every stored patch when omitted
        file: Option<PathBuf>,
    },

    /// Show whether there is enough disk space to patch
    Preflight {
        /// Patch list as a JSON array of patch descriptors
        #[arg(long, value_name = "FILE")]
        patch_list: PathBuf,

        /// Game installation directory (overrides paths.game_path)
        #[arg(long, value_name = "DIR")]
        game_path: Option<PathBuf>,

        /// Directory downloaded patches are kept in (overrides paths.patch_store)
        #[arg(long, value_name = "DIR")]
        patch_store: Option<PathBuf>,
    },

    /// View or change configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Install {
            patch_list,
            game_path,
            patch_store,
            installer,
            concurrency,
            speed_limit,
            no_preflight,
        } => {
            // Progress bars own the terminal; logs go to the file only.
            let runner = CliRunner::new(cli.verbose, false)?;
            commands::install::run(
                &runner,
                InstallArgs {
                    patch_list,
                    game_path,
                    patch_store,
                    installer,
                    concurrency,
                    speed_limit,
                    no_preflight,
                },
            )
        }
        Commands::Verify {
            patch_list,
            patch_store,
            version_id,
            file,
        } => {
            let runner = CliRunner::new(cli.verbose, true)?;
            commands::verify::run(
                &runner,
                VerifyArgs {
                    patch_list,
                    patch_store,
                    version_id,
                    file,
                },
            )
        }
        Commands::Preflight {
            patch_list,
            game_path,
            patch_store,
        } => {
            let runner = CliRunner::new(cli.verbose, true)?;
            commands::preflight::run(
                &runner,
                PreflightArgs {
                    patch_list,
                    game_path,
                    patch_store,
                },
            )
        }
        Commands::Config { command } => commands::config::run(command),
    }
}
