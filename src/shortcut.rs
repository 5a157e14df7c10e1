//! Global shortcut registration
//!
//! Thin wrapper over the OS global-hotkey facility. Registration takes the
//! key + modifier mask from [`HotkeyConfig`] and reports failure with an
//! error string (typically a collision with another application); the host
//! event loop polls the crate-provided receiver for presses.

use crate::config::HotkeyConfig;
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager};
use tracing::{info, warn};

pub struct ShortcutManager {
    manager: GlobalHotKeyManager,
    registered: Option<HotKey>,
}

impl ShortcutManager {
    pub fn new() -> Result<Self, String> {
        let manager = GlobalHotKeyManager::new().map_err(|e| e.to_string())?;
        Ok(Self {
            manager,
            registered: None,
        })
    }

    /// Register the configured global auto-type shortcut
    ///
    /// Replaces any previously registered shortcut. On failure the previous
    /// registration is already gone; callers should surface the error string
    /// to the user.
    pub fn register(&mut self, config: &HotkeyConfig) -> Result<(), String> {
        self.unregister();

        let hotkey = config_to_hotkey(config);
        self.manager.register(hotkey).map_err(|e| {
            warn!("failed to register hotkey {}: {e}", config.display_string());
            e.to_string()
        })?;
        info!("registered global auto-type hotkey: {}", config.display_string());
        self.registered = Some(hotkey);
        Ok(())
    }

    pub fn unregister(&mut self) {
        if let Some(hotkey) = self.registered.take() {
            if let Err(e) = self.manager.unregister(hotkey) {
                warn!("failed to unregister hotkey: {e}");
            }
        }
    }

    /// Non-blocking poll for a hotkey press, for the host event loop
    pub fn try_recv() -> Option<GlobalHotKeyEvent> {
        GlobalHotKeyEvent::receiver().try_recv().ok()
    }
}

impl Drop for ShortcutManager {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Convert HotkeyConfig to a global_hotkey::HotKey
fn config_to_hotkey(config: &HotkeyConfig) -> HotKey {
    let mut modifiers = Modifiers::empty();
    for m in &config.modifiers {
        match m.as_str() {
            "ctrl" => modifiers |= Modifiers::CONTROL,
            "alt" => modifiers |= Modifiers::ALT,
            "shift" => modifiers |= Modifiers::SHIFT,
            "win" => modifiers |= Modifiers::SUPER,
            _ => {}
        }
    }

    let code = match config.key.as_str() {
        "A" => Code::KeyA,
        "B" => Code::KeyB,
        "C" => Code::KeyC,
        "D" => Code::KeyD,
        "E" => Code::KeyE,
        "F" => Code::KeyF,
        "G" => Code::KeyG,
        "H" => Code::KeyH,
        "I" => Code::KeyI,
        "J" => Code::KeyJ,
        "K" => Code::KeyK,
        "L" => Code::KeyL,
        "M" => Code::KeyM,
        "N" => Code::KeyN,
        "O" => Code::KeyO,
        "P" => Code::KeyP,
        "Q" => Code::KeyQ,
        "R" => Code::KeyR,
        "S" => Code::KeyS,
        "T" => Code::KeyT,
        "U" => Code::KeyU,
        "V" => Code::KeyV,
        "W" => Code::KeyW,
        "X" => Code::KeyX,
        "Y" => Code::KeyY,
        "Z" => Code::KeyZ,
        "F1" => Code::F1,
        "F2" => Code::F2,
        "F3" => Code::F3,
        "F4" => Code::F4,
        "F5" => Code::F5,
        "F6" => Code::F6,
        "F7" => Code::F7,
        "F8" => Code::F8,
        "F9" => Code::F9,
        "F10" => Code::F10,
        "F11" => Code::F11,
        "F12" => Code::F12,
        _ => Code::KeyV, // Default fallback
    };

    let mods = if modifiers.is_empty() {
        None
    } else {
        Some(modifiers)
    };
    HotKey::new(mods, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_to_hotkey_modifiers() {
        let config = HotkeyConfig {
            modifiers: vec!["ctrl".to_string(), "shift".to_string()],
            key: "V".to_string(),
        };
        let hotkey = config_to_hotkey(&config);
        let expected = HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::KeyV);
        assert_eq!(hotkey.id(), expected.id());
    }

    #[test]
    fn test_unknown_key_falls_back() {
        let config = HotkeyConfig {
            modifiers: vec![],
            key: "??".to_string(),
        };
        let hotkey = config_to_hotkey(&config);
        assert_eq!(hotkey.id(), HotKey::new(None, Code::KeyV).id());
    }
}
