//! Archey - main entry point
//!
//! Headless front end: every command reads a request file, and `install`
//! streams the pipeline's events to the terminal until it finishes.

use anyhow::{Context, Result};
use archey::cli::{self, Cli, Commands};
use archey::events::InstallEvent;
use archey::hardware::HardwareInfo;
use archey::installer;
use archey::logic::resolver;
use archey::logic::setup_script::SetupScript;
use archey::process_guard::{self, InstallLock};
use archey::request::InstallRequest;
use archey::sanity;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

/// Initialize tracing on stderr; `RUST_LOG` overrides the `info` default.
fn init_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logger();

    // Refused while the pipeline runs; plain exit before that
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Install { config, confirm } => run_install(&cli, config, *confirm),
        Commands::Validate { config } => {
            load_request(config)?;
            println!("✓ Request file is valid: {}", config.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Packages { config } => {
            let request = load_request(config)?;
            for package in resolver::bootstrap_packages(&request) {
                println!("{}", package);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Script { config } => {
            let request = load_request(config)?;
            print!("{}", SetupScript::from_request(&request).masked().render());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Template {
            output,
            disk,
            mode,
            desktop,
            gpu,
        } => {
            let hw = HardwareInfo::detect();
            let request = cli::template_request(disk, *mode, *desktop, *gpu, hw.cpu);
            request.save_to_file(output)?;
            println!("✓ Wrote starter request to {}", output.display());
            println!("  Detected {}", hw);
            if !hw.firmware.is_uefi() {
                println!("  Warning: this machine booted in BIOS mode; install needs UEFI.");
            }
            println!("  Fill in hostname, username and password before installing.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load and validate a request file.
fn load_request(path: &Path) -> Result<InstallRequest> {
    let request = InstallRequest::load_from_file(path)?;
    request
        .validate()
        .with_context(|| format!("Invalid install request {}", path.display()))?;
    Ok(request)
}

fn run_install(cli: &Cli, config: &Path, confirm: bool) -> Result<ExitCode> {
    let request = load_request(config)?;

    if !confirm {
        anyhow::bail!(
            "Installing to {} destroys data; re-run with --confirm to proceed",
            request.disk
        );
    }

    sanity::run_preflight_checks(request.mode)?;
    let _lock = InstallLock::acquire(&cli.lock_file)?;

    let options = cli.install_options();
    info!(
        "Installing to {} ({} mode), root mounted at {}",
        request.disk,
        request.mode,
        options.mount_root.display()
    );

    let handle = installer::spawn_system_installer(request, options)
        .context("Failed to start installer thread")?;

    for event in handle.events.iter() {
        match event {
            InstallEvent::Progress(progress) => {
                println!("==> [{:>3}%] {}", progress.percent, progress.message)
            }
            InstallEvent::Log(line) => println!("    {}", line.text),
            InstallEvent::Finished(outcome) => {
                println!("{}", outcome);
                break;
            }
        }
    }

    let outcome = handle.join();
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
