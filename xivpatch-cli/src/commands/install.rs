//! Install command - download, verify and install every patch in order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use tracing::warn;
use xivpatch::manager::{
    format_bytes, HttpTransport, Installer, PatchManager, PatchManagerConfig, ProcessInstaller,
};
use xivpatch::patch::PatchDescriptor;

use super::common::{load_descriptors, resolve_game_path, resolve_patch_store};
use crate::error::CliError;
use crate::runner::CliRunner;
use crate::ui::{PatchLabels, ProgressDisplay};

const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Arguments for the install command.
pub struct InstallArgs {
    pub patch_list: PathBuf,
    pub game_path: Option<PathBuf>,
    pub patch_store: Option<PathBuf>,
    pub installer: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub speed_limit: Option<u64>,
    pub no_preflight: bool,
}

/// Run the install command.
pub fn run(runner: &CliRunner, args: InstallArgs) -> Result<(), CliError> {
    runner.log_startup("install");
    let config = runner.config();

    let descriptors = load_descriptors(&args.patch_list)?;
    let game_path = resolve_game_path(args.game_path, config)?;
    let patch_store = resolve_patch_store(args.patch_store, config);

    // CLI > config > defaults
    let mut manager_config =
        config.apply_download_settings(PatchManagerConfig::new(game_path, patch_store));
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            return Err(CliError::Config(
                "--concurrency must be at least 1".to_string(),
            ));
        }
        manager_config = manager_config.with_concurrency(concurrency);
    }
    if let Some(limit) = args.speed_limit {
        manager_config = manager_config.with_speed_limit(limit);
    }
    if let Some(installer) = args.installer {
        manager_config = manager_config.with_installer(installer);
    }
    if args.no_preflight {
        manager_config = manager_config.with_preflight(false);
    }

    let installer = manager_config.installer.clone().ok_or_else(|| {
        CliError::Config(
            "No installer configured. Set paths.installer in config.ini or use --installer"
                .to_string(),
        )
    })?;

    print_banner(&manager_config, &descriptors);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(install(manager_config, descriptors, installer))
}

fn print_banner(config: &PatchManagerConfig, descriptors: &[PatchDescriptor]) {
    let total: u64 = descriptors.iter().map(|d| d.length).sum();

    println!("XIVPatch v{}", xivpatch::VERSION);
    println!("=============");
    println!();
    println!("Patches:     {} ({})", descriptors.len(), format_bytes(total));
    println!("Game:        {}", config.game_path.display());
    println!("Patch store: {}", config.patch_store.display());
    println!("Downloads:   {} at once", config.concurrency);
    match config.speed_limit {
        0 => println!("Speed limit: none"),
        limit => println!("Speed limit: {}/s", format_bytes(limit)),
    }
    println!();
    println!("Press Ctrl+C to cancel");
    println!();
}

async fn install(
    config: PatchManagerConfig,
    descriptors: Vec<PatchDescriptor>,
    installer_path: PathBuf,
) -> Result<(), CliError> {
    let transport = Arc::new(HttpTransport::new(&config)?);
    let installer = Arc::new(ProcessInstaller::new(installer_path));
    let manager = Arc::new(PatchManager::new(
        descriptors,
        config,
        installer.clone(),
        transport,
    )?);

    // Set up signal handler for graceful shutdown
    let cancel_target = Arc::clone(&manager);
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received shutdown signal, cancelling...");
        cancel_target.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let display = ProgressDisplay::new(
        &manager.progress(),
        PatchLabels::from_catalog(manager.catalog()),
    );
    let started = Instant::now();

    let result = {
        let run = manager.run();
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);

        loop {
            tokio::select! {
                result = &mut run => break result,
                _ = ticker.tick() => display.update(&manager.progress()),
            }
        }
    };

    display.update(&manager.progress());
    display.finish();

    if let Err(e) = installer.shutdown().await {
        warn!(error = %e, "Installer did not shut down cleanly");
    }

    let progress = manager.progress();
    match result {
        Ok(()) => {
            println!(
                "{} Installed {} patches in {:.0?}",
                style("✓").green().bold(),
                progress.counts.completed,
                started.elapsed()
            );
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            println!(
                "Patching cancelled after {} of {} patches.",
                progress.counts.completed, progress.total_patches
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "{} Stopped after {} of {} patches.",
                style("✗").red().bold(),
                progress.counts.completed,
                progress.total_patches
            );
            Err(e.into())
        }
    }
}
