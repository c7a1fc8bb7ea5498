use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::manifest::ScanError;
use crate::snapshot::SnapshotError;
use crate::supervisor::DriverCommand;

/// Settings for one batch
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Driver program and leading arguments
    pub driver: DriverCommand,

    /// Wall-clock limit for one driver run
    pub timeout: Duration,

    /// Popup sweep cadence
    pub watchdog_interval: Duration,

    /// Screenshot cadence
    pub screenshot_interval: Duration,

    /// Where the driver writes its result document
    pub result_file: PathBuf,

    /// Run the popup watchdog alongside the driver
    pub watchdog: bool,

    /// Record screenshots alongside the driver
    pub screenshots: bool,

    /// Pass CI-mode flags to the driver
    pub ci: bool,
}

impl HarnessConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            driver: DriverCommand::from_config(config),
            timeout: Duration::from_secs(config.driver.timeout_secs),
            watchdog_interval: Duration::from_millis(config.polling.watchdog_interval_ms),
            screenshot_interval: Duration::from_secs(config.polling.screenshot_interval_secs),
            result_file: config.driver.result_file.clone(),
            watchdog: true,
            screenshots: true,
            ci: config.ci,
        }
    }
}

impl HarnessConfig {
    /// Without a real desktop there are no popups to dismiss and captures
    /// would only be placeholder frames, so both loops are switched off.
    pub fn for_desktop(mut self, interactive: bool) -> Self {
        if !interactive {
            self.watchdog = false;
            self.screenshots = false;
        }
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_config(crate::config::get())
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that stop the harness itself, as opposed to failing one target
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to launch driver '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task '{task}' failed: {reason}")]
    TaskJoin { task: &'static str, reason: String },

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::detect_ci_from;
    use crate::manifest::{Architecture, Target};
    use crate::supervisor::DriverOptions;

    fn options_under(vars: &[(&str, &str)]) -> String {
        let mut config = Config::defaults();
        config.ci = detect_ci_from(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        });
        let harness = HarnessConfig::from_config(&config);
        let target = Target {
            directory: PathBuf::from("m/Vendor/App"),
            architecture: Architecture::X64,
            installer_type: None,
        };
        DriverOptions::for_target(&target, harness.ci).winget_options()
    }

    #[test]
    fn test_headless_host_disables_desktop_loops() {
        let headless = HarnessConfig::from_config(&Config::defaults()).for_desktop(false);
        assert!(!headless.watchdog);
        assert!(!headless.screenshots);

        let desktop = HarnessConfig::from_config(&Config::defaults()).for_desktop(true);
        assert!(desktop.watchdog);
        assert!(desktop.screenshots);
    }

    #[test]
    fn test_ci_environment_makes_driver_silent() {
        assert!(options_under(&[("CI", "true")]).contains("--silent --disable-interactivity"));
        assert!(options_under(&[("GITHUB_ACTIONS", "true")]).contains("--disable-interactivity"));

        let local = options_under(&[("CI", "false")]);
        assert!(!local.contains("--silent"));
        assert!(!local.contains("--disable-interactivity"));
    }
}
