use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::util::SubscriberInitExt;

use installer_harness::config;
use installer_harness::desktop;
use installer_harness::harness::{HarnessConfig, Orchestrator, interrupt_on_ctrl_c};
use installer_harness::manifest::{ManifestScanner, ScanReport};
use installer_harness::runner::{BatchReport, TargetOutcome, TargetStatus};
use installer_harness::session::Session;
use installer_harness::supervisor::DriverCommand;

/// Installer Harness - unattended install/uninstall testing for package manifests
#[derive(Parser, Debug)]
#[command(
    name = "installer-harness",
    about = "Install and uninstall every package variant under manifest roots, dismissing popups and recording screenshots",
    after_help = "ENVIRONMENT VARIABLES:\n\
        HARNESS_DRIVER                 Driver launcher program\n\
        HARNESS_DRIVER_SCRIPT          Driver script path\n\
        HARNESS_TIMEOUT                Driver timeout (seconds)\n\
        HARNESS_SCREENSHOT_INTERVAL    Screenshot interval (seconds)\n\
        HARNESS_WATCHDOG_INTERVAL_MS   Popup sweep interval (milliseconds)\n\
        HARNESS_RESULT_FILE            Result document written by the driver\n\
        HARNESS_SESSION_DIR            Base directory for screenshot sessions\n\
        HARNESS_NO_ARTIFACTS           Discard screenshots after the batch\n\
        CI, GITHUB_ACTIONS             Run the driver silently and non-interactively\n\
        RUST_LOG                       Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install and uninstall every target found under the roots
    Run {
        /// Manifest root directories
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Driver timeout in seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Seconds between screenshots
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        screenshot_interval: Option<u64>,

        /// Milliseconds between popup sweeps
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        watchdog_interval_ms: Option<u64>,

        /// Delete the screenshot session when the batch ends
        #[arg(long)]
        no_artifacts: bool,

        /// Do not dismiss popups
        #[arg(long)]
        no_watchdog: bool,

        /// Do not record screenshots
        #[arg(long)]
        no_screenshots: bool,

        /// Driver launcher program (e.g. powershell, pwsh)
        #[arg(long)]
        driver: Option<String>,

        /// Driver script handed to the launcher
        #[arg(long)]
        driver_script: Option<PathBuf>,

        /// Result document location
        #[arg(long)]
        result_file: Option<PathBuf>,

        /// Output the batch report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the targets found under the roots without running anything
    Scan {
        /// Manifest root directories
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Output the scan as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            roots,
            timeout,
            screenshot_interval,
            watchdog_interval_ms,
            no_artifacts,
            no_watchdog,
            no_screenshots,
            driver,
            driver_script,
            result_file,
            json,
        }) => {
            init_logging()?;
            let config = config::get();

            let mut harness = HarnessConfig::from_config(config);
            if driver.is_some() || driver_script.is_some() {
                harness.driver = DriverCommand::powershell(
                    driver.unwrap_or_else(|| config.driver.program.clone()),
                    driver_script.as_deref().unwrap_or(&config.driver.script),
                );
            }
            if let Some(secs) = timeout {
                harness.timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = screenshot_interval {
                harness.screenshot_interval = Duration::from_secs(secs);
            }
            if let Some(ms) = watchdog_interval_ms {
                harness.watchdog_interval = Duration::from_millis(ms);
            }
            if let Some(path) = result_file {
                harness.result_file = path;
            }
            harness.watchdog = !no_watchdog;
            harness.screenshots = !no_screenshots;
            let harness = harness.for_desktop(desktop::host_is_interactive());

            let scan = ManifestScanner::new().scan(roots.as_slice())?;
            if !json {
                println!(
                    "Found {} targets in {} manifests ({} skipped)",
                    scan.targets.len(),
                    scan.directories,
                    scan.skipped.len()
                );
            }

            let keep = config.session.keep_artifacts && !no_artifacts;
            let session = Session::with_name(&config.session.base_dir, "batch").keep(keep);

            let mut orchestrator = Orchestrator::new(harness, desktop::host_session(), session)
                .on_outcome(move |outcome| {
                    if !json {
                        print_outcome(outcome);
                    }
                });
            let report = orchestrator
                .run(&scan.targets, scan.skipped, interrupt_on_ctrl_c())
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
        }

        Some(Commands::Scan { roots, json }) => {
            init_logging()?;
            let scan = ManifestScanner::new().scan(roots.as_slice())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&scan)?);
            } else {
                print_scan(&scan);
            }
        }

        None => {
            println!("Installer Harness - unattended install/uninstall testing");
            println!();
            println!("Usage: installer-harness <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run   Install and uninstall every target under the given roots");
            println!("  scan  List the targets found under the given roots");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

/// Log to stderr so stdout carries only results
fn init_logging() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish()
        .try_init()?;
    Ok(())
}

fn print_outcome(outcome: &TargetOutcome) {
    println!("\nFolder: {}", outcome.target);
    println!("Install succeed: {}", outcome.install_succeeded);
    println!("Uninstall succeed: {}", outcome.uninstall_succeeded);
    if outcome.status == TargetStatus::Interrupted {
        println!("  Interrupted");
    }
    if let Some(failure) = &outcome.failure {
        println!("  Reason: {}", failure);
    }
    for popup in &outcome.popups {
        println!("  Popup '{}': {}", popup.window, popup.action);
    }
    if !outcome.screenshots.is_empty() {
        println!("  Screenshots: {}", outcome.screenshots.len());
    }
}

fn print_summary(report: &BatchReport) {
    println!();
    println!(
        "Batch completed: {} passed, {} failed, {} skipped, {} interrupted",
        report.passed, report.failed, report.skipped, report.interrupted
    );
    if report.not_run > 0 {
        println!("  {} targets not run", report.not_run);
    }
    for skipped in &report.skipped_targets {
        println!("  Skipped {}: {}", skipped.target, skipped.reason);
    }
    if let Some(dir) = &report.session_dir {
        println!("\nSession: {}", dir.display());
    }
}

fn print_scan(scan: &ScanReport) {
    println!(
        "Found {} targets in {} manifests",
        scan.targets.len(),
        scan.directories
    );
    for target in &scan.targets {
        println!("  {}", target);
    }
    for skipped in &scan.skipped {
        println!("  Skipped {}: {}", skipped.target, skipped.reason);
    }
}
