//! Scripted desktop used by tests and by hosts without an interactive session.

use std::sync::{Mutex, MutexGuard};

use super::{
    Control, ControlKind, DIALOG_CLASS, DesktopError, DesktopResult, DesktopSession, VirtualKey,
    WindowHandle, WindowInfo,
};
use crate::snapshot::{CaptureResult, Framebuffer, GLYPH_SIZE};

const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 240;

/// A top-level window on the fixture desktop
#[derive(Debug, Clone)]
pub struct FixtureWindow {
    pub class_name: String,
    pub title: String,
    pub visible: bool,
    /// (kind, text) pairs; handles are assigned when the window is added
    pub controls: Vec<(ControlKind, String)>,
}

impl FixtureWindow {
    pub fn new(class_name: &str, title: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            title: title.to_string(),
            visible: true,
            controls: Vec::new(),
        }
    }

    /// A standard modal dialog box
    pub fn dialog(title: &str) -> Self {
        Self::new(DIALOG_CLASS, title)
    }

    pub fn label(mut self, text: &str) -> Self {
        self.controls.push((ControlKind::Label, text.to_string()));
        self
    }

    pub fn button(mut self, caption: &str) -> Self {
        self.controls.push((ControlKind::Button, caption.to_string()));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Everything the fixture observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureEvent {
    Clicked { window: String, caption: String },
    Foreground { window: String },
    Key(VirtualKey),
    Captured,
}

#[derive(Debug, Default)]
struct FixtureState {
    next_handle: u64,
    windows: Vec<(WindowHandle, FixtureWindow, Vec<Control>)>,
    events: Vec<FixtureEvent>,
    fail_captures: bool,
}

/// In-memory [`DesktopSession`] with scripted windows.
///
/// Clicking a button closes its dialog, like a real modal box would.
#[derive(Debug, Default)]
pub struct FixtureDesktop {
    state: Mutex<FixtureState>,
}

impl FixtureDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place a window on the desktop and return its handle
    pub fn add_window(&self, window: FixtureWindow) -> WindowHandle {
        let mut state = self.state();
        state.next_handle += 0x10;
        let handle = WindowHandle(state.next_handle);
        let mut controls = Vec::with_capacity(window.controls.len());
        for (kind, text) in &window.controls {
            state.next_handle += 1;
            controls.push(Control {
                handle: WindowHandle(state.next_handle),
                kind: *kind,
                text: text.clone(),
            });
        }
        state.windows.push((handle, window, controls));
        handle
    }

    /// Make subsequent screen captures fail
    pub fn fail_captures(&self, fail: bool) {
        self.state().fail_captures = fail;
    }

    pub fn events(&self) -> Vec<FixtureEvent> {
        self.state().events.clone()
    }

    /// Captions clicked so far
    pub fn clicked(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                FixtureEvent::Clicked { caption, .. } => Some(caption.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn capture_count(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| matches!(e, FixtureEvent::Captured))
            .count()
    }

    pub fn open_windows(&self) -> usize {
        self.state().windows.len()
    }
}

impl DesktopSession for FixtureDesktop {
    fn top_level_windows(&self) -> DesktopResult<Vec<WindowHandle>> {
        Ok(self.state().windows.iter().map(|(h, _, _)| *h).collect())
    }

    fn window_info(&self, window: WindowHandle) -> DesktopResult<WindowInfo> {
        let state = self.state();
        let (handle, fixture, _) = state
            .windows
            .iter()
            .find(|(h, _, _)| *h == window)
            .ok_or(DesktopError::WindowGone(window))?;
        Ok(WindowInfo {
            handle: *handle,
            class_name: fixture.class_name.clone(),
            title: fixture.title.clone(),
            visible: fixture.visible,
        })
    }

    fn child_controls(&self, window: WindowHandle) -> DesktopResult<Vec<Control>> {
        let state = self.state();
        state
            .windows
            .iter()
            .find(|(h, _, _)| *h == window)
            .map(|(_, _, controls)| controls.clone())
            .ok_or(DesktopError::WindowGone(window))
    }

    fn click(&self, control: WindowHandle) -> DesktopResult<()> {
        let mut state = self.state();
        let position = state
            .windows
            .iter()
            .position(|(_, _, controls)| controls.iter().any(|c| c.handle == control))
            .ok_or(DesktopError::WindowGone(control))?;
        let (_, window, controls) = state.windows.remove(position);
        let caption = controls
            .into_iter()
            .find(|c| c.handle == control)
            .map(|c| c.text)
            .unwrap_or_default();
        state.events.push(FixtureEvent::Clicked {
            window: window.title,
            caption,
        });
        Ok(())
    }

    fn bring_to_foreground(&self, window: WindowHandle) -> DesktopResult<()> {
        let mut state = self.state();
        let title = state
            .windows
            .iter()
            .find(|(h, _, _)| *h == window)
            .map(|(_, w, _)| w.title.clone())
            .ok_or(DesktopError::WindowGone(window))?;
        state.events.push(FixtureEvent::Foreground { window: title });
        Ok(())
    }

    fn send_key(&self, key: VirtualKey) -> DesktopResult<()> {
        self.state().events.push(FixtureEvent::Key(key));
        Ok(())
    }

    fn capture_screen(&self) -> DesktopResult<CaptureResult> {
        let titles: Vec<String> = {
            let mut state = self.state();
            if state.fail_captures {
                return Err(DesktopError::call("capture_screen", "capture disabled"));
            }
            state.events.push(FixtureEvent::Captured);
            state
                .windows
                .iter()
                .filter(|(_, w, _)| w.visible)
                .map(|(_, w, _)| w.title.clone())
                .collect()
        };

        let mut fb = Framebuffer::with_color(FRAME_WIDTH, FRAME_HEIGHT, [0, 80, 160]);
        for (row, title) in titles.iter().enumerate() {
            let y = 4 + row as u32 * (GLYPH_SIZE + 4);
            fb.draw_rect(0, y - 2, FRAME_WIDTH, GLYPH_SIZE + 4, [0, 0, 0]);
            fb.draw_text(4, y, title, [255, 255, 255], [0, 0, 0]);
        }
        Ok(fb.into_capture(self.source_type())?)
    }

    fn source_type(&self) -> &str {
        "fixture"
    }
}
