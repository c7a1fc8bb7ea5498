use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::types::{HarnessConfig, HarnessError, HarnessResult};
use crate::desktop::DesktopSession;
use crate::manifest::{SkippedTarget, Target};
use crate::recorder::ScreenshotRecorder;
use crate::results::{evaluate, read_result_document, remove_stale};
use crate::runner::{BatchReport, TargetFailure, TargetOutcome, TargetStatus};
use crate::session::Session;
use crate::supervisor::{DriverExit, DriverOptions, ProcessSupervisor};
use crate::task::{StopListener, stop_signal};
use crate::watchdog::PopupWatchdog;

type OutcomeHook = Box<dyn FnMut(&TargetOutcome) + Send>;

/// Runs targets one at a time, each with its own watchdog and recorder
pub struct Orchestrator {
    config: HarnessConfig,
    desktop: Arc<dyn DesktopSession>,
    session: Session,
    seen: HashSet<Target>,
    on_outcome: Option<OutcomeHook>,
}

impl Orchestrator {
    pub fn new(config: HarnessConfig, desktop: Arc<dyn DesktopSession>, session: Session) -> Self {
        Self {
            config,
            desktop,
            session,
            seen: HashSet::new(),
            on_outcome: None,
        }
    }

    /// Called with each outcome as soon as its target finishes
    pub fn on_outcome(mut self, hook: impl FnMut(&TargetOutcome) + Send + 'static) -> Self {
        self.on_outcome = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run every target not processed before, in order. Target failures are
    /// recorded and the batch continues; an interrupt ends it after the
    /// in-flight target has been cleaned up.
    pub async fn run(
        &mut self,
        targets: &[Target],
        skipped: Vec<SkippedTarget>,
        mut interrupt: StopListener,
    ) -> HarnessResult<BatchReport> {
        let queue: Vec<Target> = targets
            .iter()
            .filter(|t| {
                let fresh = self.seen.insert((*t).clone());
                if !fresh {
                    debug!("Already processed {}", t);
                }
                fresh
            })
            .cloned()
            .collect();

        if self.config.screenshots {
            self.session.init()?;
        }

        let mut report = BatchReport::new(queue.len(), skipped);
        info!("Running {} targets", queue.len());

        for target in &queue {
            if interrupt.is_stopped() {
                break;
            }
            let outcome = self.run_target(target, &mut interrupt).await;
            if let Some(hook) = self.on_outcome.as_mut() {
                hook(&outcome);
            }
            let interrupted = outcome.status == TargetStatus::Interrupted;
            report.record(outcome);
            if interrupted {
                break;
            }
        }

        report.finish();
        if self.config.screenshots && self.session.keep {
            report.session_dir = Some(self.session.dir.clone());
        }
        info!(
            "Batch finished: {} passed, {} failed, {} skipped, {} interrupted, {} not run",
            report.passed, report.failed, report.skipped, report.interrupted, report.not_run
        );
        Ok(report)
    }

    /// Run one target end to end. Never fails; every problem becomes part
    /// of the outcome.
    pub async fn run_target(&self, target: &Target, interrupt: &mut StopListener) -> TargetOutcome {
        let started = Instant::now();
        info!("Testing {}", target);

        if let Err(e) = remove_stale(&self.config.result_file) {
            warn!(
                "Cannot remove stale result document {}: {}",
                self.config.result_file.display(),
                e
            );
            return TargetOutcome::failed(
                target.clone(),
                TargetFailure::DriverLaunchFailure {
                    reason: format!("stale result document could not be removed: {}", e),
                },
            );
        }

        let recorder = self.config.screenshots.then(|| {
            ScreenshotRecorder::new(self.desktop.clone(), &self.session.dir, &target.label())
                .interval(self.config.screenshot_interval)
                .spawn()
        });
        let watchdog = self.config.watchdog.then(|| {
            PopupWatchdog::new(self.desktop.clone())
                .interval(self.config.watchdog_interval)
                .spawn()
        });

        let options = DriverOptions::for_target(target, self.config.ci);
        let supervisor = ProcessSupervisor::new(self.config.driver.clone(), self.config.timeout);
        let exit = supervisor.run(&target.directory, &options, interrupt).await;

        // Both loops are joined before the result is read or the next target starts.
        let screenshots = match recorder {
            Some(task) => task.stop().await.unwrap_or_else(|e| {
                warn!("{}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let popups = match watchdog {
            Some(task) => match task.stop().await {
                Ok(stats) => {
                    debug!(
                        "Watchdog made {} sweeps and acted on {} popups",
                        stats.sweeps,
                        stats.actions.len()
                    );
                    stats.actions
                }
                Err(e) => {
                    warn!("{}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut outcome = match exit {
            Ok(exit) => self.judge(target, exit),
            Err(e) => {
                warn!("{}", e);
                TargetOutcome::failed(
                    target.clone(),
                    TargetFailure::DriverLaunchFailure {
                        reason: launch_reason(&e),
                    },
                )
            }
        };
        outcome.screenshots = screenshots;
        outcome.popups = popups;
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        match (&outcome.status, &outcome.failure) {
            (TargetStatus::Passed, _) => info!("{} passed", target),
            (TargetStatus::Interrupted, _) => warn!("{} interrupted", target),
            (TargetStatus::Failed, Some(failure)) => warn!("{} failed: {}", target, failure),
            (TargetStatus::Failed, None) => warn!("{} failed", target),
        }
        outcome
    }

    /// Turn a driver exit into flags, reading the result document only after a clean exit
    fn judge(&self, target: &Target, exit: DriverExit) -> TargetOutcome {
        use TargetStatus::{Failed, Interrupted, Passed};

        let (status, install, uninstall, failure) = match exit {
            DriverExit::Interrupted => (Interrupted, false, false, None),
            DriverExit::TimedOut => (
                Failed,
                false,
                false,
                Some(TargetFailure::DriverTimeout {
                    timeout: self.config.timeout,
                }),
            ),
            DriverExit::Exited(code) if code != 0 => {
                (Failed, false, false, Some(TargetFailure::DriverExitCode(code)))
            }
            DriverExit::Exited(_) => match read_result_document(&self.config.result_file) {
                Err(e) => (Failed, false, false, Some(e.into())),
                Ok(doc) => {
                    let verdict = evaluate(&doc);
                    let status = if verdict.failure.is_none() { Passed } else { Failed };
                    (status, verdict.install, verdict.uninstall, verdict.failure)
                }
            },
        };

        TargetOutcome {
            target: target.clone(),
            status,
            driver_exit: Some(exit),
            install_succeeded: install,
            uninstall_succeeded: uninstall,
            failure,
            screenshots: Vec::new(),
            popups: Vec::new(),
            duration_ms: 0,
        }
    }
}

fn launch_reason(err: &HarnessError) -> String {
    match err {
        HarnessError::Launch { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}

/// A listener raised by the first Ctrl-C
pub fn interrupt_on_ctrl_c() -> StopListener {
    let (signal, listener) = stop_signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received; cleaning up the running target");
                signal.trigger();
            }
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                // Dropping the signal would read as a stop.
                std::future::pending::<()>().await;
                drop(signal);
            }
        }
    });
    listener
}
