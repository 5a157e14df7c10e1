//! Windows backend
//!
//! Keystroke synthesis uses SendInput with Unicode events so all characters
//! are supported without layout lookups, and avoids the clipboard entirely.
//! The window surface is plain Win32: EnumWindows, GetForegroundWindow,
//! SetForegroundWindow, ShowWindow.

use super::{Executor, KeyResult, PlatformInterface, WindowId, WindowInfo, WindowState};
use crate::error::{AutoTypeError, Result};
use crate::sequence::{Key, Modifiers};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, error};
use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP,
    KEYEVENTF_UNICODE, VIRTUAL_KEY, VK_BACK, VK_CONTROL, VK_DELETE, VK_DOWN, VK_END, VK_ESCAPE,
    VK_F1, VK_HOME, VK_INSERT, VK_LEFT, VK_LWIN, VK_MENU, VK_NEXT, VK_PRIOR, VK_RETURN, VK_RIGHT,
    VK_SHIFT, VK_SPACE, VK_TAB, VK_UP,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetForegroundWindow, GetWindowTextW, IsIconic, IsWindowVisible,
    SetForegroundWindow, ShowWindow, SW_HIDE, SW_MINIMIZE, SW_RESTORE, SW_SHOW,
};

pub struct WindowsPlatform {
    keystroke_delay_ms: u64,
}

impl WindowsPlatform {
    pub fn new(keystroke_delay_ms: u64) -> Self {
        Self { keystroke_delay_ms }
    }
}

fn hwnd(id: WindowId) -> HWND {
    HWND(id as isize as *mut core::ffi::c_void)
}

fn window_title(handle: HWND) -> String {
    let mut buffer = [0u16; 512];
    let len = unsafe { GetWindowTextW(handle, &mut buffer) };
    if len > 0 {
        String::from_utf16_lossy(&buffer[..len as usize])
    } else {
        String::new()
    }
}

fn virtual_key(key: Key) -> VIRTUAL_KEY {
    match key {
        Key::Enter => VK_RETURN,
        Key::Tab => VK_TAB,
        Key::Up => VK_UP,
        Key::Down => VK_DOWN,
        Key::Left => VK_LEFT,
        Key::Right => VK_RIGHT,
        Key::Home => VK_HOME,
        Key::End => VK_END,
        Key::PageUp => VK_PRIOR,
        Key::PageDown => VK_NEXT,
        Key::Backspace => VK_BACK,
        Key::Delete => VK_DELETE,
        Key::Insert => VK_INSERT,
        Key::Space => VK_SPACE,
        Key::Escape => VK_ESCAPE,
        Key::Function(n) => VIRTUAL_KEY(VK_F1.0 + (n as u16 - 1)),
        // Characters go out as Unicode scan codes, not virtual keys
        Key::Char(_) => VIRTUAL_KEY(0),
    }
}

fn keyboard_input(vk: VIRTUAL_KEY, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: scan,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn send_inputs(inputs: &[INPUT]) -> KeyResult {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        error!(
            "SendInput inserted {} of {} events",
            sent,
            inputs.len()
        );
        return Err(AutoTypeError::TargetLost);
    }
    Ok(())
}

/// Release Ctrl, Alt, Shift and Win before typing; the global hotkey that
/// triggered the run may still be held down
fn release_modifiers() -> KeyResult {
    let ups: Vec<INPUT> = [VK_CONTROL, VK_MENU, VK_SHIFT, VK_LWIN]
        .into_iter()
        .map(|vk| keyboard_input(vk, 0, KEYEVENTF_KEYUP))
        .collect();
    send_inputs(&ups)
}

unsafe extern "system" fn enum_callback(handle: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);
    if IsWindowVisible(handle).as_bool() {
        let title = window_title(handle);
        if !title.is_empty() {
            windows.push(WindowInfo {
                id: handle.0 as isize as u64,
                title,
            });
        }
    }
    BOOL(1)
}

#[async_trait]
impl PlatformInterface for WindowsPlatform {
    async fn is_available(&self) -> bool {
        true
    }

    async fn enumerate_windows(&self) -> Result<Vec<WindowInfo>> {
        let mut windows: Vec<WindowInfo> = Vec::new();
        unsafe {
            EnumWindows(
                Some(enum_callback),
                LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
            )
            .map_err(|e| AutoTypeError::Unsupported(format!("EnumWindows failed: {e}")))?;
        }
        Ok(windows)
    }

    async fn active_window(&self) -> Result<Option<WindowInfo>> {
        let handle = unsafe { GetForegroundWindow() };
        if handle.0.is_null() {
            return Ok(None);
        }
        Ok(Some(WindowInfo {
            id: handle.0 as isize as u64,
            title: window_title(handle),
        }))
    }

    async fn raise_window(&self, id: WindowId) -> bool {
        unsafe { SetForegroundWindow(hwnd(id)).as_bool() }
    }

    async fn window_state(&self, id: WindowId) -> Result<WindowState> {
        let handle = hwnd(id);
        let state = unsafe {
            if !IsWindowVisible(handle).as_bool() {
                WindowState::Hidden
            } else if IsIconic(handle).as_bool() {
                WindowState::Minimized
            } else {
                WindowState::Normal
            }
        };
        Ok(state)
    }

    async fn set_window_state(&self, id: WindowId, state: WindowState) -> Result<()> {
        let command = match state {
            WindowState::Normal => SW_RESTORE,
            WindowState::Minimized => SW_MINIMIZE,
            WindowState::Hidden => SW_HIDE,
        };
        unsafe {
            let _ = ShowWindow(hwnd(id), command);
            if state == WindowState::Normal {
                let _ = ShowWindow(hwnd(id), SW_SHOW);
            }
        }
        Ok(())
    }

    async fn create_executor(&self) -> Result<Box<dyn Executor>> {
        Ok(Box::new(WindowsExecutor {
            keystroke_delay_ms: self.keystroke_delay_ms,
        }))
    }
}

struct WindowsExecutor {
    keystroke_delay_ms: u64,
}

#[async_trait]
impl Executor for WindowsExecutor {
    async fn begin(&mut self, _target: Option<WindowId>) -> KeyResult {
        release_modifiers()
    }

    async fn type_key(&mut self, key: Key, modifiers: Modifiers) -> KeyResult {
        let mut inputs = Vec::new();
        let mut held = Vec::new();
        if modifiers.shift {
            held.push(VK_SHIFT);
        }
        if modifiers.ctrl {
            held.push(VK_CONTROL);
        }
        if modifiers.alt {
            held.push(VK_MENU);
        }
        if modifiers.meta {
            held.push(VK_LWIN);
        }

        for vk in &held {
            inputs.push(keyboard_input(*vk, 0, KEYBD_EVENT_FLAGS(0)));
        }
        match key {
            Key::Char(c) => {
                let mut scans = [0u16; 2];
                for scan in c.encode_utf16(&mut scans) {
                    inputs.push(keyboard_input(VIRTUAL_KEY(0), *scan, KEYEVENTF_UNICODE));
                    inputs.push(keyboard_input(
                        VIRTUAL_KEY(0),
                        *scan,
                        KEYEVENTF_UNICODE | KEYEVENTF_KEYUP,
                    ));
                }
            }
            named => {
                let vk = virtual_key(named);
                inputs.push(keyboard_input(vk, 0, KEYBD_EVENT_FLAGS(0)));
                inputs.push(keyboard_input(vk, 0, KEYEVENTF_KEYUP));
            }
        }
        for vk in held.iter().rev() {
            inputs.push(keyboard_input(*vk, 0, KEYEVENTF_KEYUP));
        }

        send_inputs(&inputs)?;
        tokio::time::sleep(Duration::from_millis(self.keystroke_delay_ms)).await;
        Ok(())
    }

    async fn type_text(&mut self, text: &SecretString) -> KeyResult {
        debug!(
            chars = text.expose_secret().chars().count(),
            "typing text via SendInput"
        );
        for ch in text.expose_secret().chars() {
            let mut scans = [0u16; 2];
            let mut inputs = Vec::with_capacity(4);
            for scan in ch.encode_utf16(&mut scans) {
                inputs.push(keyboard_input(VIRTUAL_KEY(0), *scan, KEYEVENTF_UNICODE));
                inputs.push(keyboard_input(
                    VIRTUAL_KEY(0),
                    *scan,
                    KEYEVENTF_UNICODE | KEYEVENTF_KEYUP,
                ));
            }
            send_inputs(&inputs)?;
            tokio::time::sleep(Duration::from_millis(self.keystroke_delay_ms)).await;
        }
        Ok(())
    }
}
