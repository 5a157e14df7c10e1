//! Error Types for the Auto-Type Engine
//!
//! Parse errors are surfaced before any typing begins; runtime errors abort
//! the remaining actions of the current run only.

use thiserror::Error;

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, AutoTypeError>;

/// Errors produced while parsing a sequence template
///
/// Reported with the offending substring and its byte position so the UI can
/// pinpoint the problem before the sequence is saved or used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Placeholder name is neither built-in nor a custom attribute
    #[error("unknown placeholder {{{name}}} at position {position}")]
    UnknownPlaceholder { name: String, position: usize },

    /// Unbalanced braces or a malformed placeholder argument
    #[error("malformed placeholder '{fragment}' at position {position}")]
    MalformedPlaceholder { fragment: String, position: usize },

    /// Template is empty or whitespace-only
    #[error("sequence is empty")]
    EmptySequence,
}

/// Main error type for the auto-type core
#[derive(Error, Debug)]
pub enum AutoTypeError {
    // ===== Sequence Errors =====
    /// Sequence template failed to parse
    #[error("sequence error: {0}")]
    Parse(#[from] ParseError),

    // ===== Runtime Errors =====
    /// Target window lost focus or disappeared mid-run
    #[error("target window lost")]
    TargetLost,

    /// Platform or portal refused input-injection permission
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation not supported by the active platform backend
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// No usable platform backend in the current session
    #[error("auto-type is not available on this platform")]
    PlatformUnavailable,

    // ===== Wayland Portal Errors =====
    /// Remote-desktop portal handshake failed; session was reset
    #[error("portal error: {0}")]
    Portal(String),

    // ===== Concurrency Errors =====
    /// Another auto-type run already holds the exclusivity lock
    #[error("an auto-type operation is already in progress")]
    AutoTypeInProgress,

    /// A selection dialog for a global trigger is already open
    #[error("an auto-type selection is already in progress")]
    SelectionInProgress,

    // ===== I/O Errors =====
    /// I/O error (config files, subprocess backends)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration load/store error
    #[error("config error: {0}")]
    Config(String),

    /// Restore-token keyring error
    #[error("keyring error: {0}")]
    Keyring(String),
}

impl AutoTypeError {
    /// Check if this error aborts only the current run (the hosting process
    /// keeps going and may trigger again)
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AutoTypeError::PlatformUnavailable)
    }

    /// Check if this error must reset the Wayland portal session
    pub fn resets_portal_session(&self) -> bool {
        matches!(
            self,
            AutoTypeError::Portal(_)
                | AutoTypeError::PermissionDenied(_)
                | AutoTypeError::Unsupported(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_names_offender() {
        let err = ParseError::UnknownPlaceholder {
            name: "UNKNOWNFIELD".to_string(),
            position: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("UNKNOWNFIELD"));
        assert!(msg.contains("position 0"));
    }

    #[test]
    fn test_recoverability() {
        assert!(AutoTypeError::TargetLost.is_recoverable());
        assert!(AutoTypeError::AutoTypeInProgress.is_recoverable());
        assert!(!AutoTypeError::PlatformUnavailable.is_recoverable());
    }

    #[test]
    fn test_portal_reset_classification() {
        assert!(AutoTypeError::Portal("closed".into()).resets_portal_session());
        assert!(!AutoTypeError::TargetLost.resets_portal_session());
    }
}
