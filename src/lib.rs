//! Installer Harness - unattended install/uninstall testing for package manifests.
//!
//! This crate provides:
//! - Manifest scanning that expands manifest directories into runnable targets
//! - A process supervisor with timeouts and whole-tree termination
//! - A popup watchdog that dismisses installer dialogs
//! - A screenshot recorder for post-hoc diagnosis
//! - Result document parsing and batch reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use installer_harness::{HarnessConfig, ManifestScanner, Orchestrator, Session};
//! use installer_harness::{desktop, task::StopListener};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let scan = ManifestScanner::new().scan(&[std::path::Path::new("manifests")])?;
//! let mut orchestrator =
//!     Orchestrator::new(HarnessConfig::default(), desktop::host_session(), Session::new());
//! let report = orchestrator.run(&scan.targets, scan.skipped, StopListener::never()).await?;
//! println!("{} passed, {} failed", report.passed, report.failed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod desktop;
pub mod harness;
pub mod manifest;
pub mod recorder;
pub mod results;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod supervisor;
pub mod task;
pub mod watchdog;

// Re-export runner types
pub use runner::{BatchReport, TargetFailure, TargetOutcome, TargetStatus};

// Re-export harness types
pub use harness::{HarnessConfig, HarnessError, HarnessResult, Orchestrator, interrupt_on_ctrl_c};

// Re-export the building blocks
pub use desktop::{DesktopError, DesktopResult, DesktopSession, FixtureDesktop, FixtureWindow};
pub use manifest::{Architecture, ManifestScanner, ScanError, ScanReport, Target};
pub use recorder::ScreenshotRecorder;
pub use results::{ResultDocument, Verdict, evaluate, read_result_document};
pub use supervisor::{DriverCommand, DriverExit, DriverOptions, ProcessSupervisor};
pub use watchdog::{PopupEvent, PopupRule, PopupWatchdog, RuleSet};

// Re-export snapshot types and session management
pub use session::Session;
pub use snapshot::{CaptureResult, Framebuffer, Snapshot, SnapshotConfig, SnapshotError, SnapshotResult};
