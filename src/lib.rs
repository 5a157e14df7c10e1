//! Auto-type engine for credential entries
//!
//! Converts a stored entry's sequence template into synthetic keyboard input
//! delivered to the focused foreign window, across X11, Wayland (via the
//! remote-desktop portal), Windows, and macOS. The credential store, the
//! match-selection UI, and the CLI are external collaborators: they feed
//! entries and databases in, receive `Performed`/`Rejected` events back, and
//! are asked synchronously to disambiguate when more than one entry matches.
//!
//! Typical startup wiring:
//!
//! ```no_run
//! # async fn wire() -> vault_autotype::Result<()> {
//! let config = vault_autotype::load_config()?;
//! let platform = vault_autotype::create_platform(config.keystroke_delay_ms).await?;
//! let (engine, events) = vault_autotype::AutoTypeEngine::new(platform, config);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod matching;
pub mod platform;
pub mod sequence;
pub mod shortcut;
pub mod store;
pub mod token_store;

pub use config::{load_config, save_config, AutoTypeConfig, HotkeyConfig};
pub use engine::{AutoTypeEngine, AutoTypeEvent, MatchSelector};
pub use error::{AutoTypeError, ParseError, Result};
pub use matching::{find_matches, AutoTypeMatch};
pub use platform::{
    create_platform, Executor, KeyResult, PlatformInterface, WindowId, WindowInfo, WindowState,
};
pub use sequence::{parse_sequence, verify_sequence_syntax, Action, Key, Modifiers};
pub use shortcut::ShortcutManager;
pub use store::{Association, Database, Entry, EntryView};

#[cfg(target_os = "linux")]
pub use platform::wayland::portal::{
    PortalCommand, PortalResponse, PortalStateMachine, SessionState,
};
