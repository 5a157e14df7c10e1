//! macOS backend
//!
//! Key synthesis goes through the Accessibility APIs via `enigo`. The window
//! surface is not exposed to us without per-window Accessibility scripting,
//! so enumeration is empty and typing targets the frontmost window.

use super::{Executor, KeyResult, PlatformInterface, WindowId, WindowInfo, WindowState};
use crate::error::{AutoTypeError, Result};
use crate::sequence::{Key, Modifiers};
use async_trait::async_trait;
use enigo::{Direction, Enigo, Keyboard, Settings};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, warn};

pub struct MacOsPlatform {
    keystroke_delay_ms: u64,
}

impl MacOsPlatform {
    pub fn new(keystroke_delay_ms: u64) -> Self {
        Self { keystroke_delay_ms }
    }
}

fn enigo_key(key: Key) -> enigo::Key {
    match key {
        Key::Enter => enigo::Key::Return,
        Key::Tab => enigo::Key::Tab,
        Key::Up => enigo::Key::UpArrow,
        Key::Down => enigo::Key::DownArrow,
        Key::Left => enigo::Key::LeftArrow,
        Key::Right => enigo::Key::RightArrow,
        Key::Home => enigo::Key::Home,
        Key::End => enigo::Key::End,
        Key::PageUp => enigo::Key::PageUp,
        Key::PageDown => enigo::Key::PageDown,
        Key::Backspace => enigo::Key::Backspace,
        Key::Delete => enigo::Key::Delete,
        Key::Insert => enigo::Key::Help,
        Key::Space => enigo::Key::Space,
        Key::Escape => enigo::Key::Escape,
        Key::Function(n) => match n {
            1 => enigo::Key::F1,
            2 => enigo::Key::F2,
            3 => enigo::Key::F3,
            4 => enigo::Key::F4,
            5 => enigo::Key::F5,
            6 => enigo::Key::F6,
            7 => enigo::Key::F7,
            8 => enigo::Key::F8,
            9 => enigo::Key::F9,
            10 => enigo::Key::F10,
            11 => enigo::Key::F11,
            _ => enigo::Key::F12,
        },
        Key::Char(c) => enigo::Key::Unicode(c),
    }
}

#[async_trait]
impl PlatformInterface for MacOsPlatform {
    async fn is_available(&self) -> bool {
        Enigo::new(&Settings::default()).is_ok()
    }

    async fn enumerate_windows(&self) -> Result<Vec<WindowInfo>> {
        Ok(Vec::new())
    }

    async fn active_window(&self) -> Result<Option<WindowInfo>> {
        Ok(None)
    }

    async fn raise_window(&self, _id: WindowId) -> bool {
        false
    }

    async fn window_state(&self, _id: WindowId) -> Result<WindowState> {
        Ok(WindowState::Normal)
    }

    async fn set_window_state(&self, _id: WindowId, _state: WindowState) -> Result<()> {
        Ok(())
    }

    async fn create_executor(&self) -> Result<Box<dyn Executor>> {
        let enigo = Enigo::new(&Settings::default()).map_err(|e| {
            warn!("enigo initialization failed: {e}");
            AutoTypeError::PermissionDenied(format!("accessibility access denied: {e}"))
        })?;
        Ok(Box::new(MacOsExecutor {
            enigo,
            keystroke_delay_ms: self.keystroke_delay_ms,
        }))
    }
}

struct MacOsExecutor {
    enigo: Enigo,
    keystroke_delay_ms: u64,
}

#[async_trait]
impl Executor for MacOsExecutor {
    async fn type_key(&mut self, key: Key, modifiers: Modifiers) -> KeyResult {
        let mut held = Vec::new();
        if modifiers.shift {
            held.push(enigo::Key::Shift);
        }
        if modifiers.ctrl {
            held.push(enigo::Key::Control);
        }
        if modifiers.alt {
            held.push(enigo::Key::Option);
        }
        if modifiers.meta {
            held.push(enigo::Key::Meta);
        }

        for modifier in &held {
            self.press(*modifier, Direction::Press)?;
        }
        let result = self.press(enigo_key(key), Direction::Click);
        for modifier in held.iter().rev() {
            self.press(*modifier, Direction::Release)?;
        }
        result?;
        tokio::time::sleep(Duration::from_millis(self.keystroke_delay_ms)).await;
        Ok(())
    }

    async fn type_text(&mut self, text: &SecretString) -> KeyResult {
        debug!(
            chars = text.expose_secret().chars().count(),
            "typing text via enigo"
        );
        for ch in text.expose_secret().chars() {
            self.press(enigo::Key::Unicode(ch), Direction::Click)?;
            tokio::time::sleep(Duration::from_millis(self.keystroke_delay_ms)).await;
        }
        Ok(())
    }
}

impl MacOsExecutor {
    fn press(&mut self, key: enigo::Key, direction: Direction) -> KeyResult {
        self.enigo
            .key(key, direction)
            .map_err(|e| AutoTypeError::Unsupported(format!("key synthesis failed: {e}")))
    }
}
