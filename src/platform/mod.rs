//! Platform Interface
//!
//! Polymorphic capability set over the native window system: window
//! enumeration and activation, window-state save/restore, and synthetic key
//! input. One live implementation is selected at startup; the execution
//! engine is written once against this abstraction.

use crate::error::{AutoTypeError, Result};
use crate::sequence::{Key, Modifiers};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "linux")]
pub mod wayland;
#[cfg(windows)]
mod windows;
#[cfg(target_os = "linux")]
mod x11;

/// Native window identifier (X11 window id, Win32 HWND value)
pub type WindowId = u64;

/// One enumerated top-level window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
}

/// Show state of a window, captured before auto-type hides the invoking
/// window and restored on every exit path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Normal,
    Minimized,
    Hidden,
}

/// Result of a single key-synthesis step
pub type KeyResult = Result<()>;

/// Short-lived session object batching one run's actions
///
/// The indirection lets a backend attach per-run state to the batch — the
/// Wayland executor carries a live portal session — without threading it
/// through every platform call.
#[async_trait]
pub trait Executor: Send {
    /// Prepare the backend for a run against the given target window
    async fn begin(&mut self, _target: Option<WindowId>) -> KeyResult {
        Ok(())
    }

    /// Synthesize one key press with the given modifiers held
    async fn type_key(&mut self, key: Key, modifiers: Modifiers) -> KeyResult;

    /// Type a run of text character by character
    async fn type_text(&mut self, text: &SecretString) -> KeyResult;

    /// Reserved for sequence semantics; platform no-op by default
    async fn clear_field(&mut self) -> KeyResult {
        Ok(())
    }
}

/// Capability set implemented once per OS back end
#[async_trait]
pub trait PlatformInterface: Send + Sync {
    /// Whether this backend is usable in the current session
    async fn is_available(&self) -> bool;

    /// Enumerate top-level windows; may be empty where the window system
    /// does not expose them (Wayland)
    async fn enumerate_windows(&self) -> Result<Vec<WindowInfo>>;

    /// The currently focused window, or `None` where unknowable
    async fn active_window(&self) -> Result<Option<WindowInfo>>;

    /// Raise and focus the given window; `false` when it no longer exists
    async fn raise_window(&self, id: WindowId) -> bool;

    /// Snapshot a window's show state
    async fn window_state(&self, id: WindowId) -> Result<WindowState>;

    /// Restore a window to a previously snapshotted show state
    async fn set_window_state(&self, id: WindowId, state: WindowState) -> Result<()>;

    /// Create the per-run executor used to replay a batch of actions
    async fn create_executor(&self) -> Result<Box<dyn Executor>>;
}

/// Select and construct the platform backend for this process
///
/// Exactly one implementation is compiled in per target OS; on Linux the
/// session type decides between the Wayland portal backend and X11.
pub async fn create_platform(keystroke_delay_ms: u64) -> Result<Arc<dyn PlatformInterface>> {
    #[cfg(target_os = "linux")]
    {
        if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            let platform = wayland::WaylandPlatform::connect(keystroke_delay_ms).await?;
            return Ok(Arc::new(platform));
        }
        return Ok(Arc::new(x11::X11Platform::new(keystroke_delay_ms)));
    }

    #[cfg(windows)]
    {
        return Ok(Arc::new(windows::WindowsPlatform::new(keystroke_delay_ms)));
    }

    #[cfg(target_os = "macos")]
    {
        return Ok(Arc::new(macos::MacOsPlatform::new(keystroke_delay_ms)));
    }

    #[allow(unreachable_code)]
    Err(AutoTypeError::PlatformUnavailable)
}
