//! Credential-store surface consumed by the auto-type core
//!
//! The store itself (groups, encryption, persistence) is an external
//! collaborator. The core only reads an entry's resolved field values, its
//! sequence template, and its window-title associations.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;

/// Sequence used when an entry carries no override of its own
pub const DEFAULT_SEQUENCE: &str = "{USERNAME}{TAB}{PASSWORD}{ENTER}";

/// Read-only view of an entry, the seam between the parser and the store
///
/// Field names are matched case-insensitively. `resolve_field` reads live
/// values and must not be called during syntax-only validation.
pub trait EntryView: Send + Sync {
    /// Whether the named field or custom attribute exists on this entry
    fn has_field(&self, name: &str) -> bool;

    /// Read the current value of the named field or custom attribute
    fn resolve_field(&self, name: &str) -> Option<SecretString>;
}

/// A (window-title-pattern, sequence) pair attached to an entry
///
/// An empty sequence inherits the entry's effective sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub window_pattern: String,
    pub sequence: String,
}

impl Association {
    pub fn new(window_pattern: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            window_pattern: window_pattern.into(),
            sequence: sequence.into(),
        }
    }
}

/// A credential entry as handed to the core by the store
#[derive(Debug)]
pub struct Entry {
    pub title: String,
    pub username: String,
    pub password: SecretString,
    /// TOTP code already resolved by the store, if the entry has one
    pub totp: Option<String>,
    pub url: String,
    pub notes: String,
    /// Custom attributes, keyed by their (case-preserved) names
    pub attributes: HashMap<String, String>,
    /// Per-entry sequence override; `None` falls back to [`DEFAULT_SEQUENCE`]
    pub sequence: Option<String>,
    pub associations: Vec<Association>,
    pub autotype_enabled: bool,
}

impl Entry {
    pub fn new(title: impl Into<String>, username: impl Into<String>, password: &str) -> Self {
        Self {
            title: title.into(),
            username: username.into(),
            password: SecretString::from(password.to_string()),
            totp: None,
            url: String::new(),
            notes: String::new(),
            attributes: HashMap::new(),
            sequence: None,
            associations: Vec::new(),
            autotype_enabled: true,
        }
    }

    /// The sequence used when no association overrides it
    pub fn effective_sequence(&self) -> String {
        match &self.sequence {
            Some(seq) if !seq.trim().is_empty() => seq.clone(),
            _ => DEFAULT_SEQUENCE.to_string(),
        }
    }

    fn custom_attribute(&self, name: &str) -> Option<&String> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

impl EntryView for Entry {
    fn has_field(&self, name: &str) -> bool {
        match name.to_ascii_uppercase().as_str() {
            "USERNAME" | "PASSWORD" | "URL" | "TITLE" | "NOTES" => true,
            "TOTP" => self.totp.is_some(),
            _ => self.custom_attribute(name).is_some(),
        }
    }

    fn resolve_field(&self, name: &str) -> Option<SecretString> {
        match name.to_ascii_uppercase().as_str() {
            "USERNAME" => Some(SecretString::from(self.username.clone())),
            "PASSWORD" => Some(SecretString::from(
                self.password.expose_secret().to_string(),
            )),
            "TOTP" => self.totp.clone().map(SecretString::from),
            "URL" => Some(SecretString::from(self.url.clone())),
            "TITLE" => Some(SecretString::from(self.title.clone())),
            "NOTES" => Some(SecretString::from(self.notes.clone())),
            _ => self
                .custom_attribute(name)
                .map(|value| SecretString::from(value.clone())),
        }
    }
}

/// One open database as seen by the match engine
#[derive(Debug, Default)]
pub struct Database {
    pub name: String,
    pub entries: Vec<Arc<Entry>>,
}

impl Database {
    pub fn new(name: impl Into<String>, entries: Vec<Arc<Entry>>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }
}
