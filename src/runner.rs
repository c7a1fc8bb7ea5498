//! Types for per-target outcomes and the batch report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::manifest::{SkippedTarget, Target};
use crate::supervisor::DriverExit;
use crate::watchdog::PopupEvent;

/// Why a target did not pass. Recovered per target; never ends the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TargetFailure {
    #[error("driver could not be launched: {reason}")]
    DriverLaunchFailure { reason: String },

    #[error("driver exited with code {0}")]
    DriverExitCode(i32),

    #[error("driver timed out after {timeout:?}")]
    DriverTimeout { timeout: Duration },

    #[error("driver wrote no result document")]
    MissingResultFile,

    #[error("result document is not valid JSON: {0}")]
    MalformedResult(String),

    #[error("result document is missing fields: {0}")]
    MissingFields(String),

    #[error("install failed with exit code {0}")]
    InstallFailed(i64),

    #[error("no uninstall was recorded")]
    NoUninstallRecorded,

    #[error("all {total} uninstalls failed")]
    UninstallFailed { total: usize },

    #[error("{failed} of {total} uninstalls failed")]
    PartialUninstallFailure { failed: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Passed,
    Failed,
    Interrupted,
}

/// Result of running one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub target: Target,
    pub status: TargetStatus,
    /// `None` when the driver never started
    pub driver_exit: Option<DriverExit>,
    pub install_succeeded: bool,
    pub uninstall_succeeded: bool,
    pub failure: Option<TargetFailure>,
    /// Screenshots written while the driver ran
    pub screenshots: Vec<PathBuf>,
    /// Popups the watchdog acted on
    pub popups: Vec<PopupEvent>,
    pub duration_ms: u64,
}

impl TargetOutcome {
    /// An outcome with both flags false and no artifacts
    pub fn failed(target: Target, failure: TargetFailure) -> Self {
        Self {
            target,
            status: TargetStatus::Failed,
            driver_exit: None,
            install_succeeded: false,
            uninstall_succeeded: false,
            failure: Some(failure),
            screenshots: Vec::new(),
            popups: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TargetStatus::Passed
    }
}

/// Everything one batch produced
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Runnable targets handed to the batch
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Targets filtered out by the scanner
    pub skipped: usize,
    pub interrupted: usize,
    /// Targets never started because the batch was interrupted
    pub not_run: usize,
    pub outcomes: Vec<TargetOutcome>,
    pub skipped_targets: Vec<SkippedTarget>,
    /// Screenshot session directory, when artifacts are kept
    pub session_dir: Option<PathBuf>,
}

impl BatchReport {
    pub fn new(total: usize, skipped_targets: Vec<SkippedTarget>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            total,
            passed: 0,
            failed: 0,
            skipped: skipped_targets.len(),
            interrupted: 0,
            not_run: 0,
            outcomes: Vec::new(),
            skipped_targets,
            session_dir: None,
        }
    }

    pub fn record(&mut self, outcome: TargetOutcome) {
        match outcome.status {
            TargetStatus::Passed => self.passed += 1,
            TargetStatus::Failed => self.failed += 1,
            TargetStatus::Interrupted => self.interrupted += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        self.not_run = self.total.saturating_sub(self.outcomes.len());
        self.finished_at = Some(Utc::now());
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted > 0 || self.not_run > 0
    }

    pub fn popups(&self) -> impl Iterator<Item = &PopupEvent> {
        self.outcomes.iter().flat_map(|o| o.popups.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Architecture;

    fn target(name: &str) -> Target {
        Target {
            directory: PathBuf::from(name),
            architecture: Architecture::Neutral,
            installer_type: None,
        }
    }

    #[test]
    fn test_report_counts() {
        let mut report = BatchReport::new(3, Vec::new());
        let mut ok = TargetOutcome::failed(target("a"), TargetFailure::MissingResultFile);
        ok.status = TargetStatus::Passed;
        ok.failure = None;
        report.record(ok);
        report.record(TargetOutcome::failed(target("b"), TargetFailure::DriverExitCode(1)));
        report.finish();

        assert_eq!((report.passed, report.failed, report.interrupted), (1, 1, 0));
        assert_eq!(report.not_run, 1);
        assert!(report.was_interrupted());
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_failure_serializes_with_kind() {
        let json = serde_json::to_value(TargetFailure::PartialUninstallFailure {
            failed: 1,
            total: 2,
        })
        .unwrap();
        assert_eq!(json["kind"], "partial_uninstall_failure");
        assert_eq!(json["detail"]["failed"], 1);

        let json = serde_json::to_value(TargetFailure::DriverExitCode(5)).unwrap();
        assert_eq!(json["detail"], 5);

        let json = serde_json::to_value(TargetFailure::MissingResultFile).unwrap();
        assert_eq!(json["kind"], "missing_result_file");
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            TargetFailure::PartialUninstallFailure { failed: 1, total: 3 }.to_string(),
            "1 of 3 uninstalls failed"
        );
        assert_eq!(
            TargetFailure::DriverTimeout {
                timeout: Duration::from_secs(600)
            }
            .to_string(),
            "driver timed out after 600s"
        );
    }
}
