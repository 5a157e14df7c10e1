//! X11 backend
//!
//! Drives `xdotool` for key synthesis and `wmctrl`/`xprop` for the window
//! surface. Keeping these as subprocesses avoids linking X libraries and
//! matches how the session tools themselves behave under X11.

use super::{Executor, KeyResult, PlatformInterface, WindowId, WindowInfo, WindowState};
use crate::error::{AutoTypeError, Result};
use crate::sequence::{Key, Modifiers};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct X11Platform {
    keystroke_delay_ms: u64,
}

impl X11Platform {
    pub fn new(keystroke_delay_ms: u64) -> Self {
        Self { keystroke_delay_ms }
    }
}

async fn run_tool(tool: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(tool).args(args).output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AutoTypeError::Unsupported(format!("{tool} is not installed"))
        } else {
            AutoTypeError::Io(e)
        }
    })?;
    if !output.status.success() {
        return Err(AutoTypeError::Unsupported(format!(
            "{tool} exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn tool_exists(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Title portion of a `wmctrl -l` line: everything after the third
/// whitespace-separated field, internal spacing preserved
fn wmctrl_title(line: &str) -> &str {
    let mut fields = 0;
    let mut in_field = false;
    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if in_field {
                fields += 1;
                in_field = false;
            }
        } else {
            if fields == 3 {
                return &line[i..];
            }
            in_field = true;
        }
    }
    ""
}

/// xdotool keysym name for a key
fn key_name(key: Key) -> String {
    match key {
        Key::Enter => "Return".to_string(),
        Key::Tab => "Tab".to_string(),
        Key::Up => "Up".to_string(),
        Key::Down => "Down".to_string(),
        Key::Left => "Left".to_string(),
        Key::Right => "Right".to_string(),
        Key::Home => "Home".to_string(),
        Key::End => "End".to_string(),
        Key::PageUp => "Page_Up".to_string(),
        Key::PageDown => "Page_Down".to_string(),
        Key::Backspace => "BackSpace".to_string(),
        Key::Delete => "Delete".to_string(),
        Key::Insert => "Insert".to_string(),
        Key::Space => "space".to_string(),
        Key::Escape => "Escape".to_string(),
        Key::Function(n) => format!("F{n}"),
        // xdotool resolves bare keysym names; non-ASCII goes through the
        // Unicode keysym form
        Key::Char(c) => {
            if c.is_ascii_alphanumeric() {
                c.to_string()
            } else {
                format!("U{:04X}", c as u32)
            }
        }
    }
}

#[async_trait]
impl PlatformInterface for X11Platform {
    async fn is_available(&self) -> bool {
        std::env::var_os("DISPLAY").is_some() && tool_exists("xdotool").await
    }

    async fn enumerate_windows(&self) -> Result<Vec<WindowInfo>> {
        // wmctrl -l lines: <id> <desktop> <host> <title...>
        let listing = run_tool("wmctrl", &["-l"]).await?;
        let mut windows = Vec::new();
        for line in listing.lines() {
            let id_field = match line.split_whitespace().next() {
                Some(field) => field,
                None => continue,
            };
            let id = match u64::from_str_radix(id_field.trim_start_matches("0x"), 16) {
                Ok(id) => id,
                Err(_) => continue,
            };
            windows.push(WindowInfo {
                id,
                title: wmctrl_title(line).to_string(),
            });
        }
        Ok(windows)
    }

    async fn active_window(&self) -> Result<Option<WindowInfo>> {
        let id_output = match run_tool("xdotool", &["getactivewindow"]).await {
            Ok(out) => out,
            // No active window is not an error
            Err(AutoTypeError::Unsupported(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let id: u64 = match id_output.trim().parse() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        let title = run_tool("xdotool", &["getwindowname", &id.to_string()])
            .await
            .map(|t| t.trim_end_matches('\n').to_string())
            .unwrap_or_default();
        Ok(Some(WindowInfo { id, title }))
    }

    async fn raise_window(&self, id: WindowId) -> bool {
        run_tool("xdotool", &["windowactivate", "--sync", &id.to_string()])
            .await
            .is_ok()
    }

    async fn window_state(&self, id: WindowId) -> Result<WindowState> {
        let output = run_tool("xprop", &["-id", &id.to_string(), "WM_STATE"]).await?;
        let state = if output.contains("Iconic") {
            WindowState::Minimized
        } else if output.contains("Withdrawn") {
            WindowState::Hidden
        } else {
            WindowState::Normal
        };
        Ok(state)
    }

    async fn set_window_state(&self, id: WindowId, state: WindowState) -> Result<()> {
        let id = id.to_string();
        match state {
            WindowState::Normal => {
                run_tool("xdotool", &["windowmap", &id]).await?;
                run_tool("xdotool", &["windowactivate", &id]).await?;
            }
            WindowState::Minimized => {
                run_tool("xdotool", &["windowminimize", &id]).await?;
            }
            WindowState::Hidden => {
                run_tool("xdotool", &["windowunmap", &id]).await?;
            }
        }
        Ok(())
    }

    async fn create_executor(&self) -> Result<Box<dyn Executor>> {
        Ok(Box::new(X11Executor {
            keystroke_delay_ms: self.keystroke_delay_ms,
        }))
    }
}

struct X11Executor {
    keystroke_delay_ms: u64,
}

#[async_trait]
impl Executor for X11Executor {
    async fn type_key(&mut self, key: Key, modifiers: Modifiers) -> KeyResult {
        let mut combo = String::new();
        if modifiers.ctrl {
            combo.push_str("ctrl+");
        }
        if modifiers.alt {
            combo.push_str("alt+");
        }
        if modifiers.shift {
            combo.push_str("shift+");
        }
        if modifiers.meta {
            combo.push_str("super+");
        }
        combo.push_str(&key_name(key));

        debug!(key = %combo, "synthesizing key via xdotool");
        run_tool("xdotool", &["key", "--clearmodifiers", "--", &combo])
            .await
            .map_err(|e| {
                warn!("xdotool key failed: {e}");
                AutoTypeError::TargetLost
            })?;
        tokio::time::sleep(Duration::from_millis(self.keystroke_delay_ms)).await;
        Ok(())
    }

    async fn type_text(&mut self, text: &SecretString) -> KeyResult {
        // Text goes through stdin so secrets never appear in the process list
        let mut child = Command::new("xdotool")
            .args([
                "type",
                "--clearmodifiers",
                "--delay",
                &self.keystroke_delay_ms.to_string(),
                "--file",
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AutoTypeError::Unsupported("xdotool is not installed".to_string())
                } else {
                    AutoTypeError::Io(e)
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.expose_secret().as_bytes()).await?;
        }
        let status = child.wait().await?;
        if !status.success() {
            warn!("xdotool type exited with {status}");
            return Err(AutoTypeError::TargetLost);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(Key::Enter), "Return");
        assert_eq!(key_name(Key::PageUp), "Page_Up");
        assert_eq!(key_name(Key::Function(12)), "F12");
        assert_eq!(key_name(Key::Char('a')), "a");
        assert_eq!(key_name(Key::Char('€')), "U20AC");
    }

    #[test]
    fn test_wmctrl_title_preserves_inner_whitespace() {
        // Titles with runs of spaces must come through byte-for-byte, or
        // they stop matching association patterns that contain them
        let line = "0x04000007 -1 myhost notes.txt  —  Editor";
        assert_eq!(wmctrl_title(line), "notes.txt  —  Editor");
        assert_eq!(wmctrl_title("0x01  0 host Plain"), "Plain");
        assert_eq!(wmctrl_title("0x01 0 host"), "");
    }

    #[tokio::test]
    async fn test_missing_tool_reports_unsupported() {
        let err = run_tool("no-such-tool-anywhere", &["--version"])
            .await
            .unwrap_err();
        assert!(matches!(err, AutoTypeError::Unsupported(_)));
    }
}
