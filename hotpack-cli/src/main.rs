//! Hotpack CLI - Command-line interface
//!
//! This binary drives the hotpack library from a terminal: checking
//! module versions, running hot updates, unpacking embedded packages,
//! and inspecting local state.

use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use hotpack::config::UpdateConfig;
use hotpack::layout;
use hotpack::manifest::ManifestStore;
use hotpack::runtime::{HotPatchRuntime, RuntimeEvent};
use hotpack::update::UpdateNotification;

/// Interval between controlling-thread ticks while work is in flight.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "hotpack")]
#[command(version = hotpack::VERSION)]
#[command(about = "Hot-update and package-cache tool for modular game content", long_about = None)]
struct Args {
    /// Base URL of the patch server
    #[arg(long, default_value = "http://localhost:8000")]
    server: String,

    /// Writable data directory (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory holding embedded packages from the install image
    #[arg(long)]
    embedded_root: Option<PathBuf>,

    /// Worker thread budget shared across downloading modules
    #[arg(long, default_value = "3")]
    threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show a module's local manifest state
    Status {
        /// Module name
        module: String,
    },
    /// Ask the server whether a module needs an update
    Check {
        /// Module name
        module: String,
    },
    /// Download everything one or more modules are missing
    Update {
        /// Module names
        modules: Vec<String>,

        /// Skip the version comparison and trust the file check alone
        #[arg(long)]
        no_version_check: bool,
    },
    /// Unpack a module's embedded packages into the writable area
    Unpack {
        /// Module name
        module: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            process::exit(1);
        }
    };

    let exit_code = match &args.command {
        Command::Status { module } => cmd_status(&config, module),
        Command::Check { module } => cmd_check(config, module),
        Command::Update {
            modules,
            no_version_check,
        } => cmd_update(config, modules, !no_version_check),
        Command::Unpack { module } => cmd_unpack(config, module),
    };
    process::exit(exit_code);
}

fn build_config(args: &Args) -> Result<UpdateConfig, String> {
    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .ok_or("no platform data directory; pass --data-dir")?
            .join("hotpack"),
    };
    let embedded_root = args
        .embedded_root
        .clone()
        .unwrap_or_else(|| data_dir.join("embedded"));

    Ok(UpdateConfig::new(args.server.clone(), data_dir, embedded_root)
        .with_max_download_threads(args.threads))
}

fn cmd_status(config: &UpdateConfig, module: &str) -> i32 {
    let store = ManifestStore::new(&config.data_dir, module);

    println!("Module: {}", module.to_lowercase());
    println!("Hot directory: {}", store.dir().display());

    match store.load_local() {
        Ok(Some(manifest)) => {
            let version = manifest
                .current_version()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string());
            let entries = manifest
                .current_patch()
                .map(|p| p.entries.len())
                .unwrap_or(0);
            println!("Applied version: {version} ({entries} packages)");

            let missing = manifest
                .current_patch()
                .map(|p| {
                    p.entries
                        .iter()
                        .filter(|e| !store.dir().join(&e.package_name).exists())
                        .count()
                })
                .unwrap_or(0);
            if missing > 0 {
                println!("Warning: {missing} package files missing from disk");
            }
        }
        Ok(None) => println!("Applied version: none (never updated)"),
        Err(e) => {
            eprintln!("Error reading local manifest: {e}");
            return 1;
        }
    }

    match store.load_server() {
        Ok(Some(manifest)) => {
            let version = manifest
                .current_version()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string());
            println!("Last fetched server version: {version}");
        }
        Ok(None) => println!("Last fetched server version: never fetched"),
        Err(e) => {
            eprintln!("Error reading server snapshot: {e}");
            return 1;
        }
    }
    0
}

fn cmd_check(config: UpdateConfig, module: &str) -> i32 {
    let mut runtime = match HotPatchRuntime::new(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    runtime.validate_assets(module);
    loop {
        for event in runtime.tick() {
            if let RuntimeEvent::Update(notification) = event {
                match notification {
                    UpdateNotification::ValidateResult {
                        module,
                        need_update,
                        size_mb,
                    } => {
                        if need_update {
                            println!("{module}: update needed ({size_mb:.3} MB to download)");
                        } else {
                            println!("{module}: up to date");
                        }
                        return 0;
                    }
                    UpdateNotification::CheckFailed { module, error } => {
                        eprintln!("{module}: version check failed: {error}");
                        return 1;
                    }
                    _ => {}
                }
            }
        }
        thread::sleep(TICK_INTERVAL);
    }
}

fn cmd_update(config: UpdateConfig, modules: &[String], validate_version: bool) -> i32 {
    if modules.is_empty() {
        eprintln!("Error: no modules given");
        return 1;
    }

    let mut runtime = match HotPatchRuntime::new(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    for module in modules {
        runtime.request_update(module, validate_version);
    }

    let mut failed_packages = 0usize;
    let mut check_failures = 0usize;
    loop {
        for event in runtime.tick() {
            let RuntimeEvent::Update(notification) = event else {
                continue;
            };
            match notification {
                UpdateNotification::Started { module, total_mb } => {
                    println!("{module}: downloading {total_mb:.3} MB");
                }
                UpdateNotification::Waiting { module } => {
                    println!("{module}: waiting for a download slot");
                }
                UpdateNotification::Progress {
                    module,
                    downloaded_mb,
                    total_mb,
                } => {
                    print!("\r{module}: {downloaded_mb:.3} / {total_mb:.3} MB");
                }
                UpdateNotification::PackageCompleted { module, package } => {
                    let marker = if layout::is_config_package(&package) {
                        " (package index)"
                    } else {
                        ""
                    };
                    println!("\r{module}: {package} done{marker}");
                }
                UpdateNotification::PackageFailed {
                    module,
                    package,
                    error,
                } => {
                    failed_packages += 1;
                    eprintln!("\r{module}: {package} failed: {error}");
                }
                UpdateNotification::UpToDate { module } => {
                    println!("{module}: up to date");
                }
                UpdateNotification::Completed {
                    module,
                    failed_packages: failed,
                } => {
                    if failed == 0 {
                        println!("\r{module}: update complete");
                    } else {
                        println!("\r{module}: update finished with {failed} failed packages");
                    }
                }
                UpdateNotification::CheckFailed { module, error } => {
                    check_failures += 1;
                    eprintln!("{module}: version check failed: {error}");
                }
                UpdateNotification::ValidateResult { .. } => {}
            }
        }

        if runtime.is_idle() {
            break;
        }
        thread::sleep(TICK_INTERVAL);
    }

    if failed_packages > 0 || check_failures > 0 {
        1
    } else {
        0
    }
}

fn cmd_unpack(config: UpdateConfig, module: &str) -> i32 {
    let runtime = match HotPatchRuntime::new(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let result = runtime.unpack_embedded(module, &mut |done, total| {
        print!("\rUnpacking: {done:.3} / {total:.3} MB");
    });

    match result {
        Ok(outcome) if outcome.unpacked == 0 => {
            println!("Nothing to unpack ({} files already present)", outcome.skipped);
            0
        }
        Ok(outcome) => {
            println!(
                "\rUnpacked {} files ({:.3} MB), {} already present",
                outcome.unpacked, outcome.unpacked_mb, outcome.skipped
            );
            0
        }
        Err(e) => {
            eprintln!("Error unpacking {module}: {e}");
            1
        }
    }
}
