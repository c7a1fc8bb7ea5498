//! Win32-backed desktop session.
//!
//! Child control text is read with `WM_GETTEXT` rather than `GetWindowTextW`,
//! which cannot read controls owned by another process.

use std::ffi::c_void;
use std::mem::size_of;

use windows::Win32::Foundation::{BOOL, HWND, LPARAM, TRUE, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BI_RGB, BITMAPINFO, BITMAPINFOHEADER, BitBlt, CreateCompatibleBitmap, CreateCompatibleDC,
    DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC, SRCCOPY, SelectObject,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    INPUT, INPUT_0, INPUT_KEYBOARD, KEYBD_EVENT_FLAGS, KEYBDINPUT, KEYEVENTF_KEYUP, SendInput,
    VIRTUAL_KEY, VK_RETURN, VK_TAB,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BM_CLICK, EnumChildWindows, EnumWindows, GetClassNameW, GetSystemMetrics, GetWindowTextW,
    IsWindow, IsWindowVisible, PostMessageW, SM_CXSCREEN, SM_CYSCREEN, SMTO_ABORTIFHUNG,
    SendMessageTimeoutW, SetForegroundWindow, WM_GETTEXT, WM_GETTEXTLENGTH,
};

use super::{
    Control, ControlKind, DesktopError, DesktopResult, DesktopSession, VirtualKey, WindowHandle,
    WindowInfo,
};
use crate::snapshot::{CaptureResult, Framebuffer};

/// Upper bound for a single `WM_GETTEXT` round trip (milliseconds)
const GETTEXT_TIMEOUT_MS: u32 = 500;

/// Desktop session of the interactive user, via Win32
#[derive(Debug, Default)]
pub struct Win32Desktop;

impl Win32Desktop {
    pub fn new() -> Self {
        Self
    }
}

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as usize as *mut c_void)
}

fn handle(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as usize as u64)
}

unsafe extern "system" fn collect_hwnd(hwnd: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: lparam is the `&mut Vec<HWND>` passed by the enumerating caller,
    // which outlives the synchronous enumeration.
    let handles = unsafe { &mut *(lparam.0 as *mut Vec<HWND>) };
    handles.push(hwnd);
    TRUE
}

fn class_name(window: HWND) -> String {
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(window, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

fn window_title(window: HWND) -> String {
    let mut buf = [0u16; 512];
    let len = unsafe { GetWindowTextW(window, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

fn control_text(window: HWND) -> String {
    let mut length = 0usize;
    unsafe {
        SendMessageTimeoutW(
            window,
            WM_GETTEXTLENGTH,
            WPARAM(0),
            LPARAM(0),
            SMTO_ABORTIFHUNG,
            GETTEXT_TIMEOUT_MS,
            Some(&mut length),
        );
    }
    if length == 0 {
        return String::new();
    }

    let mut buf = vec![0u16; length + 1];
    let mut copied = 0usize;
    unsafe {
        SendMessageTimeoutW(
            window,
            WM_GETTEXT,
            WPARAM(buf.len()),
            LPARAM(buf.as_mut_ptr() as isize),
            SMTO_ABORTIFHUNG,
            GETTEXT_TIMEOUT_MS,
            Some(&mut copied),
        );
    }
    String::from_utf16_lossy(&buf[..copied.min(length)])
}

fn key_input(key: VIRTUAL_KEY, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: key,
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

impl DesktopSession for Win32Desktop {
    fn top_level_windows(&self) -> DesktopResult<Vec<WindowHandle>> {
        let mut handles: Vec<HWND> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_hwnd),
                LPARAM(&mut handles as *mut Vec<HWND> as isize),
            )
        }
        .map_err(|e| DesktopError::call("EnumWindows", e))?;
        Ok(handles.into_iter().map(handle).collect())
    }

    fn window_info(&self, window: WindowHandle) -> DesktopResult<WindowInfo> {
        let hwnd = hwnd(window);
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return Err(DesktopError::WindowGone(window));
        }
        Ok(WindowInfo {
            handle: window,
            class_name: class_name(hwnd),
            title: window_title(hwnd),
            visible: unsafe { IsWindowVisible(hwnd) }.as_bool(),
        })
    }

    fn child_controls(&self, window: WindowHandle) -> DesktopResult<Vec<Control>> {
        let parent = hwnd(window);
        if !unsafe { IsWindow(parent) }.as_bool() {
            return Err(DesktopError::WindowGone(window));
        }
        let mut children: Vec<HWND> = Vec::new();
        unsafe {
            let _ = EnumChildWindows(
                parent,
                Some(collect_hwnd),
                LPARAM(&mut children as *mut Vec<HWND> as isize),
            );
        }
        Ok(children
            .into_iter()
            .map(|child| Control {
                handle: handle(child),
                kind: ControlKind::from_class(&class_name(child)),
                text: control_text(child),
            })
            .collect())
    }

    fn click(&self, control: WindowHandle) -> DesktopResult<()> {
        // Posted, not sent: a modal button handler may block until the dialog closes.
        unsafe { PostMessageW(hwnd(control), BM_CLICK, WPARAM(0), LPARAM(0)) }
            .map_err(|e| DesktopError::call("PostMessageW(BM_CLICK)", e))
    }

    fn bring_to_foreground(&self, window: WindowHandle) -> DesktopResult<()> {
        if unsafe { SetForegroundWindow(hwnd(window)) }.as_bool() {
            Ok(())
        } else {
            Err(DesktopError::call(
                "SetForegroundWindow",
                "foreground change refused",
            ))
        }
    }

    fn send_key(&self, key: VirtualKey) -> DesktopResult<()> {
        let vk = match key {
            VirtualKey::Enter => VK_RETURN,
            VirtualKey::Tab => VK_TAB,
        };
        let inputs = [
            key_input(vk, KEYBD_EVENT_FLAGS(0)),
            key_input(vk, KEYEVENTF_KEYUP),
        ];
        let sent = unsafe { SendInput(&inputs, size_of::<INPUT>() as i32) };
        if sent as usize == inputs.len() {
            Ok(())
        } else {
            Err(DesktopError::call(
                "SendInput",
                format!("{} of {} events injected", sent, inputs.len()),
            ))
        }
    }

    fn capture_screen(&self) -> DesktopResult<CaptureResult> {
        let (width, height) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        if width <= 0 || height <= 0 {
            return Err(DesktopError::call("GetSystemMetrics", "no primary display"));
        }

        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        let copied = unsafe {
            let screen = GetDC(HWND::default());
            let memory = CreateCompatibleDC(screen);
            let bitmap = CreateCompatibleBitmap(screen, width, height);
            let previous = SelectObject(memory, bitmap);

            let blit = BitBlt(memory, 0, 0, width, height, screen, 0, 0, SRCCOPY);

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    // Negative height requests top-down rows.
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let lines = if blit.is_ok() {
                GetDIBits(
                    memory,
                    bitmap,
                    0,
                    height as u32,
                    Some(pixels.as_mut_ptr().cast()),
                    &mut info,
                    DIB_RGB_COLORS,
                )
            } else {
                0
            };

            SelectObject(memory, previous);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(memory);
            ReleaseDC(HWND::default(), screen);
            lines
        };

        if copied != height {
            return Err(DesktopError::call(
                "BitBlt/GetDIBits",
                format!("copied {} of {} scanlines", copied, height),
            ));
        }

        let fb = Framebuffer::from_bgra(width as u32, height as u32, &pixels)?;
        Ok(fb.into_capture(self.source_type())?)
    }

    fn source_type(&self) -> &str {
        "gdi"
    }
}
