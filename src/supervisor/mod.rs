//! Process supervisor: runs the install driver for one target under a
//! wall-clock timeout and reclaims its whole process tree when it overruns.

pub mod tree;

use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{self, Config};
use crate::harness::{HarnessError, HarnessResult};
use crate::manifest::{Architecture, InstallerType, Target};
use crate::task::StopListener;

pub use tree::{ProcessTree, descendants_of, parse_stat_ppid, process_table};

/// Longest wait for a killed driver to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Program plus the fixed leading arguments of the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCommand {
    program: String,
    base_args: Vec<OsString>,
}

impl DriverCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.base_args.push(arg.into());
        self
    }

    /// `<program> -ExecutionPolicy Bypass -File <script>`
    pub fn powershell(program: impl Into<String>, script: &Path) -> Self {
        Self::new(program)
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-File")
            .arg(script.as_os_str())
    }

    pub fn from_config(config: &Config) -> Self {
        Self::powershell(config.driver.program.clone(), &config.driver.script)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn base_args(&self) -> &[OsString] {
        &self.base_args
    }
}

impl Default for DriverCommand {
    fn default() -> Self {
        Self::from_config(config::get())
    }
}

/// Flags handed to the driver for one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverOptions {
    pub silent: bool,
    pub disable_interactivity: bool,
    pub accept_agreements: bool,
    pub architecture: Option<Architecture>,
    pub installer_type: Option<InstallerType>,
    pub auto_uninstall: bool,
}

impl DriverOptions {
    /// Options for an unattended install and uninstall of `target`.
    /// `ci` adds silent mode and turns interactivity off.
    pub fn for_target(target: &Target, ci: bool) -> Self {
        Self {
            silent: ci,
            disable_interactivity: ci,
            accept_agreements: true,
            architecture: match target.architecture {
                Architecture::Neutral => None,
                arch => Some(arch),
            },
            installer_type: target.installer_type.clone(),
            auto_uninstall: true,
        }
    }

    /// The option string forwarded to the package manager
    pub fn winget_options(&self) -> String {
        let mut flags: Vec<String> = Vec::new();
        if self.accept_agreements {
            flags.push("--accept-package-agreements".into());
            flags.push("--accept-source-agreements".into());
        }
        if self.silent {
            flags.push("--silent".into());
        }
        if self.disable_interactivity {
            flags.push("--disable-interactivity".into());
        }
        if let Some(arch) = self.architecture {
            flags.push(format!("--architecture {}", arch));
        }
        if let Some(kind) = &self.installer_type {
            flags.push(format!("--installer-type {}", kind));
        }
        flags.join(" ")
    }

    /// Arguments that follow the driver's base command
    pub fn to_args(&self, dir: &Path) -> Vec<OsString> {
        let mut args = vec![dir.as_os_str().to_os_string()];
        let options = self.winget_options();
        if !options.is_empty() {
            args.push("-WinGetOptions".into());
            args.push(options.into());
        }
        if self.auto_uninstall {
            args.push("-AutoUninstall".into());
        }
        args
    }
}

/// How a driver run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum DriverExit {
    Exited(i32),
    TimedOut,
    Interrupted,
}

impl DriverExit {
    pub fn is_success(&self) -> bool {
        matches!(self, DriverExit::Exited(0))
    }
}

impl fmt::Display for DriverExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverExit::Exited(code) => write!(f, "exited with code {}", code),
            DriverExit::TimedOut => f.write_str("timed out"),
            DriverExit::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Launches the driver and waits for exit, timeout or interrupt
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    command: DriverCommand,
    timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(command: DriverCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn command(&self) -> &DriverCommand {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the driver for `dir`. The driver's output streams to the console.
    ///
    /// On timeout or interrupt the driver and all of its descendants are
    /// killed before this returns.
    pub async fn run(
        &self,
        dir: &Path,
        options: &DriverOptions,
        interrupt: &mut StopListener,
    ) -> HarnessResult<DriverExit> {
        let mut cmd = tokio::process::Command::new(&self.command.program);
        cmd.args(&self.command.base_args)
            .args(options.to_args(dir))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| HarnessError::Launch {
            program: self.command.program.clone(),
            source,
        })?;
        let Some(pid) = child.id() else {
            // Already reaped; nothing left to supervise.
            let status = child.wait().await?;
            return Ok(DriverExit::Exited(exit_code(&status)));
        };
        let tree = ProcessTree::attach(pid);
        info!(
            "Driver started (pid {}) for {} with options: {}",
            pid,
            dir.display(),
            options.winget_options()
        );

        let exit = tokio::select! {
            status = child.wait() => {
                let status = status?;
                let code = exit_code(&status);
                info!("Driver exited with code {} after {:?}", code, started.elapsed());
                return Ok(DriverExit::Exited(code));
            }
            _ = tokio::time::sleep(self.timeout) => DriverExit::TimedOut,
            _ = interrupt.stopped() => DriverExit::Interrupted,
        };

        let descendants = tree.kill();
        if let Err(e) = child.start_kill() {
            debug!("Driver {} already gone: {}", pid, e);
        }
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to reap driver {}: {}", pid, e),
            Err(_) => warn!("Driver {} did not exit within {:?} of being killed", pid, REAP_TIMEOUT),
        }
        warn!(
            "Driver {} after {:?}; killed process tree of {} (+{} descendants)",
            exit,
            started.elapsed(),
            pid,
            descendants
        );
        Ok(exit)
    }
}

/// Exit code, with Unix signal deaths mapped to `128 + signal`
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::task::stop_signal;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn shell(script: &str) -> DriverCommand {
        // `$0` is the placeholder name; the target directory lands in `$1`.
        DriverCommand::new("sh").arg("-c").arg(script).arg("driver")
    }

    fn target(arch: Architecture, kind: Option<&str>) -> Target {
        Target {
            directory: PathBuf::from("/manifests/App"),
            architecture: arch,
            installer_type: kind.map(InstallerType::new),
        }
    }

    #[test]
    fn test_winget_options_ci() {
        let options = DriverOptions::for_target(&target(Architecture::X64, Some("msi")), true);
        assert_eq!(
            options.winget_options(),
            "--accept-package-agreements --accept-source-agreements --silent \
             --disable-interactivity --architecture x64 --installer-type msi"
        );
    }

    #[test]
    fn test_neutral_target_has_no_selectors() {
        let options = DriverOptions::for_target(&target(Architecture::Neutral, None), false);
        assert_eq!(
            options.winget_options(),
            "--accept-package-agreements --accept-source-agreements"
        );
        let args = options.to_args(Path::new("/m"));
        assert_eq!(args.last().map(|a| a.to_string_lossy().to_string()), Some("-AutoUninstall".into()));
    }

    #[test]
    fn test_powershell_command_shape() {
        let cmd = DriverCommand::powershell("powershell", Path::new("Bootstrap.ps1"));
        assert_eq!(cmd.program(), "powershell");
        let args: Vec<String> = cmd
            .base_args()
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["-ExecutionPolicy", "Bypass", "-File", "Bootstrap.ps1"]);
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let supervisor = ProcessSupervisor::new(shell("exit 3"), Duration::from_secs(10));
        let exit = supervisor
            .run(Path::new("/tmp"), &DriverOptions::default(), &mut StopListener::never())
            .await
            .unwrap();
        assert_eq!(exit, DriverExit::Exited(3));
        assert!(!exit.is_success());
    }

    #[tokio::test]
    async fn test_driver_receives_directory_and_options() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args.txt");
        let script = format!("printf '%s\\n' \"$@\" > '{}'", out.display());
        let supervisor = ProcessSupervisor::new(shell(&script), Duration::from_secs(10));
        let options = DriverOptions::for_target(&target(Architecture::X86, None), false);

        let exit = supervisor
            .run(Path::new("/manifests/App"), &options, &mut StopListener::never())
            .await
            .unwrap();

        assert!(exit.is_success());
        let lines: Vec<String> = std::fs::read_to_string(&out)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(
            lines,
            vec![
                "/manifests/App".to_string(),
                "-WinGetOptions".to_string(),
                "--accept-package-agreements --accept-source-agreements --architecture x86"
                    .to_string(),
                "-AutoUninstall".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let supervisor = ProcessSupervisor::new(
            DriverCommand::new("/nonexistent/driver-binary"),
            Duration::from_secs(1),
        );
        let err = supervisor
            .run(Path::new("/tmp"), &DriverOptions::default(), &mut StopListener::never())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_interrupt_kills_driver() {
        let supervisor = ProcessSupervisor::new(shell("sleep 30"), Duration::from_secs(60));
        let (signal, mut listener) = stop_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            signal.trigger();
        });

        let started = Instant::now();
        let exit = supervisor
            .run(Path::new("/tmp"), &DriverOptions::default(), &mut listener)
            .await
            .unwrap();

        assert_eq!(exit, DriverExit::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    mod linux {
        use super::*;
        use pretty_assertions::assert_eq;

        /// Dead, or a zombie waiting for a reaper that is not us
        fn is_gone(pid: u32) -> bool {
            match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Err(_) => true,
                Ok(stat) => stat
                    .rfind(')')
                    .and_then(|i| stat[i + 1..].split_whitespace().next())
                    .map(|state| state == "Z" || state == "X")
                    .unwrap_or(true),
            }
        }

        async fn wait_gone(pid: u32) -> bool {
            for _ in 0..100 {
                if is_gone(pid) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            false
        }

        async fn read_pid(path: &Path) -> u32 {
            for _ in 0..100 {
                if let Ok(text) = std::fs::read_to_string(path) {
                    if let Ok(pid) = text.trim().parse() {
                        return pid;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("driver never wrote {}", path.display());
        }

        #[tokio::test]
        async fn test_timeout_kills_descendants() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("grandchild.pid");
            let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
            let supervisor = ProcessSupervisor::new(shell(&script), Duration::from_millis(500));

            let exit = supervisor
                .run(Path::new("/tmp"), &DriverOptions::default(), &mut StopListener::never())
                .await
                .unwrap();

            assert_eq!(exit, DriverExit::TimedOut);
            let grandchild = read_pid(&pid_file).await;
            assert!(wait_gone(grandchild).await, "grandchild {} leaked", grandchild);
        }

        #[tokio::test]
        async fn test_timeout_reaches_descendants_outside_the_group() {
            let has_setsid = std::process::Command::new("setsid")
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if !has_setsid {
                return;
            }

            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("escaped.pid");
            let script = format!("setsid sleep 30 & echo $! > '{}'; wait", pid_file.display());
            let supervisor = ProcessSupervisor::new(shell(&script), Duration::from_millis(500));

            let exit = supervisor
                .run(Path::new("/tmp"), &DriverOptions::default(), &mut StopListener::never())
                .await
                .unwrap();

            assert_eq!(exit, DriverExit::TimedOut);
            let escaped = read_pid(&pid_file).await;
            assert!(wait_gone(escaped).await, "escaped descendant {} leaked", escaped);
        }
    }
}
