//! Desktop session capability shared by the popup watchdog and the screenshot
//! recorder.
//!
//! The interactive desktop is a single host-wide resource that cannot be
//! locked or partitioned. Everything that touches it goes through
//! [`DesktopSession`], so tests can substitute a [`FixtureDesktop`] for the
//! real Win32 session.

pub mod fixture;
#[cfg(windows)]
pub mod win32;

use std::sync::Arc;
use thiserror::Error;

use crate::snapshot::{CaptureResult, SnapshotError};

pub use fixture::{FixtureDesktop, FixtureEvent, FixtureWindow};
#[cfg(windows)]
pub use win32::Win32Desktop;

/// Window class of the standard modal dialog box
pub const DIALOG_CLASS: &str = "#32770";

/// Opaque window identifier (an `HWND` on Windows)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowHandle(pub u64);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Top-level window attributes read once per sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub class_name: String,
    pub title: String,
    pub visible: bool,
}

/// Child control categories the watchdog cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Static text (`Static`)
    Label,
    /// Push button (`Button`)
    Button,
    Other,
}

impl ControlKind {
    /// Classify a Win32 child window class name
    pub fn from_class(class_name: &str) -> Self {
        if class_name.eq_ignore_ascii_case("Static") {
            ControlKind::Label
        } else if class_name.eq_ignore_ascii_case("Button") {
            ControlKind::Button
        } else {
            ControlKind::Other
        }
    }
}

/// A child control of a top-level window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub handle: WindowHandle,
    pub kind: ControlKind,
    pub text: String,
}

/// Keys the watchdog synthesizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualKey {
    Enter,
    Tab,
}

pub type DesktopResult<T> = Result<T, DesktopError>;

#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("window {0} is gone")]
    WindowGone(WindowHandle),

    #[error("desktop call {call} failed: {reason}")]
    Call { call: &'static str, reason: String },

    #[error("screen capture failed: {0}")]
    Capture(#[from] SnapshotError),
}

impl DesktopError {
    pub fn call(call: &'static str, reason: impl ToString) -> Self {
        DesktopError::Call {
            call,
            reason: reason.to_string(),
        }
    }
}

/// Capability over the interactive desktop.
///
/// Implementations must be callable from any thread; the watchdog and the
/// recorder run their sweeps on the blocking pool concurrently.
pub trait DesktopSession: Send + Sync {
    /// Snapshot of the current top-level windows, in z-order
    fn top_level_windows(&self) -> DesktopResult<Vec<WindowHandle>>;

    fn window_info(&self, window: WindowHandle) -> DesktopResult<WindowInfo>;

    /// Child controls of `window`, in enumeration order
    fn child_controls(&self, window: WindowHandle) -> DesktopResult<Vec<Control>>;

    /// Press a button control
    fn click(&self, control: WindowHandle) -> DesktopResult<()>;

    fn bring_to_foreground(&self, window: WindowHandle) -> DesktopResult<()>;

    /// Synthesize a key-down/key-up pair
    fn send_key(&self, key: VirtualKey) -> DesktopResult<()>;

    /// Capture the primary display as PNG
    fn capture_screen(&self) -> DesktopResult<CaptureResult>;

    /// Short identifier recorded in artifact metadata
    fn source_type(&self) -> &str;
}

/// Whether this host has a real desktop to watch and capture
pub fn host_is_interactive() -> bool {
    cfg!(windows)
}

/// The desktop session for this host.
///
/// Windows gets the real Win32 session. Other hosts get an empty fixture so
/// the harness still runs (no popups to dismiss, placeholder frames).
pub fn host_session() -> Arc<dyn DesktopSession> {
    #[cfg(windows)]
    {
        Arc::new(Win32Desktop::new())
    }
    #[cfg(not(windows))]
    {
        tracing::warn!("No interactive desktop on this platform; popup handling is disabled");
        Arc::new(FixtureDesktop::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_kind_from_class() {
        assert_eq!(ControlKind::from_class("Static"), ControlKind::Label);
        assert_eq!(ControlKind::from_class("BUTTON"), ControlKind::Button);
        assert_eq!(ControlKind::from_class("Edit"), ControlKind::Other);
    }

    #[test]
    fn test_only_windows_hosts_are_interactive() {
        assert_eq!(host_is_interactive(), cfg!(windows));
    }

    #[test]
    fn test_window_handle_display() {
        assert_eq!(WindowHandle(0x1f).to_string(), "0x1f");
    }
}
