//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for the installer harness, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for an unattended Windows test host
//! - CI detection that changes the default driver flags
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HARNESS_DRIVER` | Program used to launch the driver script | `powershell` (`pwsh` off Windows) |
//! | `HARNESS_DRIVER_SCRIPT` | Driver script passed to the program | `Bootstrap.ps1` next to the executable |
//! | `HARNESS_TIMEOUT` | Driver wall-clock timeout (seconds) | `600` |
//! | `HARNESS_SCREENSHOT_INTERVAL` | Screenshot interval (seconds) | `10` |
//! | `HARNESS_WATCHDOG_INTERVAL_MS` | Popup sweep interval (milliseconds) | `1000` |
//! | `HARNESS_RESULT_FILE` | Result document written by the driver | `<temp>/arp.json` |
//! | `HARNESS_SESSION_DIR` | Base directory for screenshot sessions | `<temp>/installer-harness` |
//! | `HARNESS_NO_ARTIFACTS` | Discard screenshots after the batch | unset |
//!
//! `CI` and `GITHUB_ACTIONS` are consulted to decide whether the driver runs
//! silently with interactivity disabled.
//!
//! # Example
//!
//! ```bash
//! export HARNESS_TIMEOUT=900
//! export HARNESS_SESSION_DIR="D:\\harness-artifacts"
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default driver launcher on Windows
pub const DEFAULT_DRIVER_PROGRAM: &str = "powershell";

/// Default driver launcher elsewhere
pub const DEFAULT_DRIVER_PROGRAM_PORTABLE: &str = "pwsh";

/// Default driver script name, resolved next to the harness executable
pub const DEFAULT_DRIVER_SCRIPT: &str = "Bootstrap.ps1";

/// Default driver timeout (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Default screenshot interval (seconds)
pub const DEFAULT_SCREENSHOT_INTERVAL_SECS: u64 = 10;

/// Default popup sweep interval (milliseconds)
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 1000;

/// Default result document name inside the temp directory
pub const DEFAULT_RESULT_FILE_NAME: &str = "arp.json";

/// Default session directory name inside the temp directory
pub const DEFAULT_SESSION_DIR_NAME: &str = "installer-harness";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_DRIVER: &str = "HARNESS_DRIVER";
pub const ENV_DRIVER_SCRIPT: &str = "HARNESS_DRIVER_SCRIPT";
pub const ENV_TIMEOUT: &str = "HARNESS_TIMEOUT";
pub const ENV_SCREENSHOT_INTERVAL: &str = "HARNESS_SCREENSHOT_INTERVAL";
pub const ENV_WATCHDOG_INTERVAL_MS: &str = "HARNESS_WATCHDOG_INTERVAL_MS";
pub const ENV_RESULT_FILE: &str = "HARNESS_RESULT_FILE";
pub const ENV_SESSION_DIR: &str = "HARNESS_SESSION_DIR";
pub const ENV_NO_ARTIFACTS: &str = "HARNESS_NO_ARTIFACTS";

/// CI indicators, checked in order
pub const CI_INDICATORS: [&str; 2] = ["CI", "GITHUB_ACTIONS"];

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for the harness
#[derive(Debug, Clone)]
pub struct Config {
    /// Driver launch settings
    pub driver: DriverSettings,
    /// Background task cadence
    pub polling: PollSettings,
    /// Artifact session settings
    pub session: SessionSettings,
    /// Whether a CI environment was detected
    pub ci: bool,
}

/// Driver-related settings
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Launcher program (e.g. `powershell`)
    pub program: String,
    /// Script handed to the launcher
    pub script: PathBuf,
    /// Wall-clock timeout (seconds)
    pub timeout_secs: u64,
    /// Fixed location of the driver's result document
    pub result_file: PathBuf,
}

/// Poll intervals for the background tasks
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub watchdog_interval_ms: u64,
    pub screenshot_interval_secs: u64,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: PathBuf,
    /// Whether screenshots survive the batch
    pub keep_artifacts: bool,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            driver: DriverSettings::from_env(),
            polling: PollSettings::from_env(),
            session: SessionSettings::from_env(),
            ci: detect_ci(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            driver: DriverSettings::defaults(),
            polling: PollSettings::defaults(),
            session: SessionSettings::defaults(),
            ci: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DriverSettings {
    pub fn from_env() -> Self {
        Self {
            program: env::var(ENV_DRIVER).unwrap_or_else(|_| default_driver_program().to_string()),
            script: env::var_os(ENV_DRIVER_SCRIPT)
                .map(PathBuf::from)
                .unwrap_or_else(default_driver_script),
            timeout_secs: env_positive(ENV_TIMEOUT).unwrap_or(DEFAULT_TIMEOUT_SECS),
            result_file: env::var_os(ENV_RESULT_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(default_result_file),
        }
    }

    pub fn defaults() -> Self {
        Self {
            program: default_driver_program().to_string(),
            script: default_driver_script(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            result_file: default_result_file(),
        }
    }
}

impl PollSettings {
    pub fn from_env() -> Self {
        Self {
            watchdog_interval_ms: env_positive(ENV_WATCHDOG_INTERVAL_MS)
                .unwrap_or(DEFAULT_WATCHDOG_INTERVAL_MS),
            screenshot_interval_secs: env_positive(ENV_SCREENSHOT_INTERVAL)
                .unwrap_or(DEFAULT_SCREENSHOT_INTERVAL_SECS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            screenshot_interval_secs: DEFAULT_SCREENSHOT_INTERVAL_SECS,
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var_os(ENV_SESSION_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(default_session_dir),
            keep_artifacts: !is_truthy(env::var(ENV_NO_ARTIFACTS).ok().as_deref()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: default_session_dir(),
            keep_artifacts: true,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_positive(name: &str) -> Option<u64> {
    parse_positive(env::var(name).ok().as_deref())
}

/// A strictly positive count; zero and garbage fall back to the default
fn parse_positive(value: Option<&str>) -> Option<u64> {
    value
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|&n| n > 0)
}

/// Interpret an environment flag value. Unset, empty, `0` and `false` are off.
pub fn is_truthy(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => false,
        Some(v) => !(v.is_empty() || v == "0" || v == "false" || v == "no"),
    }
}

/// Whether any CI indicator is set in the environment
pub fn detect_ci() -> bool {
    detect_ci_from(|name| env::var(name).ok())
}

/// CI detection over an arbitrary variable lookup
pub fn detect_ci_from(lookup: impl Fn(&str) -> Option<String>) -> bool {
    CI_INDICATORS
        .iter()
        .any(|name| is_truthy(lookup(name).as_deref()))
}

fn default_driver_program() -> &'static str {
    if cfg!(windows) {
        DEFAULT_DRIVER_PROGRAM
    } else {
        DEFAULT_DRIVER_PROGRAM_PORTABLE
    }
}

fn default_driver_script() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_DRIVER_SCRIPT)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DRIVER_SCRIPT))
}

fn default_result_file() -> PathBuf {
    env::temp_dir().join(DEFAULT_RESULT_FILE_NAME)
}

fn default_session_dir() -> PathBuf {
    env::temp_dir().join(DEFAULT_SESSION_DIR_NAME)
}

/// Get session base directory (convenience function)
pub fn session_base_dir() -> PathBuf {
    get().session.base_dir.clone()
}
