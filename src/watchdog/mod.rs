//! Popup watchdog: a background loop that dismisses installer dialogs.
//!
//! Every sweep walks the top-level windows of the desktop session, turns the
//! ones it recognizes into [`Popup`]s and applies the first matching
//! [`PopupRule`]. A sweep always runs to completion; the stop signal is only
//! checked between sweeps.

pub mod rules;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::desktop::{DesktopResult, DesktopSession, VirtualKey, WindowHandle};
use crate::task::BackgroundTask;

pub use rules::{
    ACCEPT_CAPTIONS, ButtonView, DECLINE_CAPTIONS, Decision, Popup, PopupAction, PopupKind,
    PopupRule, RESTART_WORDS, RuleSet, normalize_caption,
};

/// Default sweep interval
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest accepted sweep interval; shorter requests are raised to it
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Pause between the Enter and Tab presses sent to toolkit frames
pub const DEFAULT_KEY_PAUSE: Duration = Duration::from_millis(150);

/// One action the watchdog took
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupEvent {
    /// Title of the window acted on
    pub window: String,
    /// Rule that chose the action
    pub rule: String,
    /// Human-readable action, e.g. `click "Next"`
    pub action: String,
}

/// Returned when the watchdog task is joined
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdogStats {
    pub sweeps: u64,
    pub actions: Vec<PopupEvent>,
}

/// Polls the desktop for known popups
pub struct PopupWatchdog {
    desktop: Arc<dyn DesktopSession>,
    rules: RuleSet,
    interval: Duration,
    key_pause: Duration,
}

impl PopupWatchdog {
    pub fn new(desktop: Arc<dyn DesktopSession>) -> Self {
        Self {
            desktop,
            rules: RuleSet::default(),
            interval: DEFAULT_SWEEP_INTERVAL,
            key_pause: DEFAULT_KEY_PAUSE,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn key_pause(mut self, pause: Duration) -> Self {
        self.key_pause = pause;
        self
    }

    /// Run one pass over the desktop. Blocking.
    pub fn sweep(&self) -> Vec<PopupEvent> {
        let windows = match self.desktop.top_level_windows() {
            Ok(windows) => windows,
            Err(e) => {
                debug!("Window enumeration failed: {}", e);
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        for window in windows {
            match self.handle_window(window) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                // Windows routinely vanish mid-sweep.
                Err(e) => debug!("Skipping window {}: {}", window, e),
            }
        }
        events
    }

    fn handle_window(&self, window: WindowHandle) -> DesktopResult<Option<PopupEvent>> {
        let info = self.desktop.window_info(window)?;
        let popup = match PopupKind::of(&info) {
            Some(PopupKind::Dialog) => {
                let controls = self.desktop.child_controls(window)?;
                Popup::dialog(&info, &controls)
            }
            Some(PopupKind::ToolkitFrame) => Popup::toolkit_frame(&info),
            None => return Ok(None),
        };

        let Some(Decision {
            rule,
            action: Some(action),
        }) = self.rules.evaluate(&popup)
        else {
            return Ok(None);
        };

        self.apply(&action)?;

        let description = match &action {
            PopupAction::Click { caption, .. } => format!("click {:?}", caption),
            PopupAction::AcceptAndAdvance { .. } => "enter+tab".to_string(),
        };
        info!(
            "Popup '{}': {} (rule {})",
            popup.title(),
            description,
            rule
        );
        Ok(Some(PopupEvent {
            window: popup.title().to_string(),
            rule: rule.to_string(),
            action: description,
        }))
    }

    fn apply(&self, action: &PopupAction) -> DesktopResult<()> {
        match action {
            PopupAction::Click { button, .. } => self.desktop.click(*button),
            PopupAction::AcceptAndAdvance { window } => {
                // Keys go to whatever has focus, so stop if the window could not be raised.
                self.desktop.bring_to_foreground(*window)?;
                self.desktop.send_key(VirtualKey::Enter)?;
                std::thread::sleep(self.key_pause);
                self.desktop.send_key(VirtualKey::Tab)
            }
        }
    }

    /// Start the polling loop; stop it with [`BackgroundTask::stop`]
    pub fn spawn(self) -> BackgroundTask<WatchdogStats> {
        let watchdog = Arc::new(self);
        BackgroundTask::spawn("popup-watchdog", move |mut stop| async move {
            let mut stats = WatchdogStats::default();
            let mut ticker = tokio::time::interval(watchdog.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.stopped() => break,
                    _ = ticker.tick() => {}
                }

                let sweeper = Arc::clone(&watchdog);
                match tokio::task::spawn_blocking(move || sweeper.sweep()).await {
                    Ok(events) => {
                        stats.sweeps += 1;
                        stats.actions.extend(events);
                    }
                    Err(e) => warn!("Popup sweep aborted: {}", e),
                }
            }

            debug!(
                "Popup watchdog stopped after {} sweeps, {} actions",
                stats.sweeps,
                stats.actions.len()
            );
            stats
        })
    }
}
