//! Engine configuration storage

use crate::error::{AutoTypeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Delay between synthesized keystrokes in milliseconds
const DEFAULT_KEYSTROKE_DELAY_MS: u64 = 5;

/// Delay before typing starts, letting focus settle on the target window
const DEFAULT_START_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTypeConfig {
    /// Always hand matches to the selection collaborator, even for a single
    /// match
    #[serde(default)]
    pub always_ask: bool,
    #[serde(default = "default_keystroke_delay")]
    pub keystroke_delay_ms: u64,
    #[serde(default = "default_start_delay")]
    pub start_delay_ms: u64,
    /// Hide the invoking window while typing into the target
    #[serde(default = "default_hide_window")]
    pub hide_invoking_window: bool,
    pub hotkey: HotkeyConfig,
}

fn default_keystroke_delay() -> u64 {
    DEFAULT_KEYSTROKE_DELAY_MS
}

fn default_start_delay() -> u64 {
    DEFAULT_START_DELAY_MS
}

fn default_hide_window() -> bool {
    true
}

impl Default for AutoTypeConfig {
    fn default() -> Self {
        Self {
            always_ask: false,
            keystroke_delay_ms: DEFAULT_KEYSTROKE_DELAY_MS,
            start_delay_ms: DEFAULT_START_DELAY_MS,
            hide_invoking_window: true,
            hotkey: HotkeyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    pub modifiers: Vec<String>, // "ctrl", "alt", "shift", "win"
    pub key: String,            // "A".."Z", "F1".."F12"
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            modifiers: vec!["ctrl".to_string(), "shift".to_string()],
            key: "V".to_string(),
        }
    }
}

impl HotkeyConfig {
    pub fn display_string(&self) -> String {
        let mut parts = Vec::new();
        for m in &self.modifiers {
            match m.as_str() {
                "ctrl" => parts.push("Ctrl"),
                "alt" => parts.push("Alt"),
                "shift" => parts.push("Shift"),
                "win" => parts.push("Win"),
                _ => {}
            }
        }
        parts.push(&self.key);
        parts.join("+")
    }
}

fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("APPDATA") {
        return Ok(PathBuf::from(dir).join("vault-autotype"));
    }
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(dir).join("vault-autotype"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".config").join("vault-autotype"));
    }
    Err(AutoTypeError::Config(
        "no config directory available".to_string(),
    ))
}

fn config_path() -> Result<PathBuf> {
    let dir = config_dir()?;
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir.join("config.json"))
}

pub fn load_config() -> Result<AutoTypeConfig> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(AutoTypeConfig::default());
    }

    let content = fs::read_to_string(&path)?;
    serde_json::from_str(&content).map_err(|e| AutoTypeError::Config(e.to_string()))
}

pub fn save_config(config: &AutoTypeConfig) -> Result<()> {
    let path = config_path()?;
    let content =
        serde_json::to_string_pretty(config).map_err(|e| AutoTypeError::Config(e.to_string()))?;
    fs::write(&path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AutoTypeConfig::default();
        assert!(!config.always_ask);
        assert_eq!(config.keystroke_delay_ms, 5);
        assert_eq!(config.start_delay_ms, 500);
        assert!(config.hide_invoking_window);
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let config: AutoTypeConfig =
            serde_json::from_str(r#"{"hotkey":{"modifiers":["ctrl"],"key":"B"}}"#).unwrap();
        assert_eq!(config.keystroke_delay_ms, 5);
        assert_eq!(config.hotkey.display_string(), "Ctrl+B");
    }
}
