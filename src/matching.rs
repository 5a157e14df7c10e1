//! Match Engine
//!
//! Resolves a target window title against the open databases into a ranked
//! list of (entry, sequence) candidates. Ranking is deterministic: database
//! iteration order, then per-database discovery order, with an entry's
//! default-sequence match preceding its association matches.

use crate::store::{Database, Entry};
use regex::RegexBuilder;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A candidate (entry, sequence) pair found for a target window
///
/// The entry reference is a weak back reference into the credential store;
/// the core never owns entry lifetime. Identity is entry + exact sequence
/// string.
#[derive(Debug, Clone)]
pub struct AutoTypeMatch {
    pub entry: Weak<Entry>,
    pub sequence: String,
}

impl AutoTypeMatch {
    fn new(entry: &Arc<Entry>, sequence: String) -> Self {
        Self {
            entry: Arc::downgrade(entry),
            sequence,
        }
    }
}

impl PartialEq for AutoTypeMatch {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.entry, &other.entry) && self.sequence == other.sequence
    }
}

/// Check a window title against an association pattern
///
/// Case-insensitive. A pattern containing `*` is matched as an anchored
/// wildcard over the whole title (`*` matches any run, including everything);
/// otherwise the pattern matches by substring containment.
pub fn title_matches_pattern(title: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    if pattern.contains('*') {
        let mut regex = String::from("^");
        for (i, part) in pattern.split('*').enumerate() {
            if i > 0 {
                regex.push_str(".*");
            }
            regex.push_str(&regex::escape(part));
        }
        regex.push('$');
        match RegexBuilder::new(&regex).case_insensitive(true).build() {
            Ok(re) => re.is_match(title),
            Err(_) => false,
        }
    } else {
        title.to_lowercase().contains(&pattern.to_lowercase())
    }
}

/// Whether the entry matches the window by its own metadata, granting it a
/// default-sequence match: the entry title or the URL host contained in the
/// window title
fn entry_matches_window(entry: &Entry, window_title: &str) -> bool {
    let title = window_title.to_lowercase();
    if !entry.title.is_empty() && title.contains(&entry.title.to_lowercase()) {
        return true;
    }
    match url_host(&entry.url) {
        Some(host) if !host.is_empty() => title.contains(&host.to_lowercase()),
        _ => false,
    }
}

/// Host portion of a stored URL, without scheme, path, or port
fn url_host(url: &str) -> Option<&str> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    Some(host.split(':').next().unwrap_or(host))
}

/// Find all (entry, sequence) candidates for the given window title
///
/// An entry contributes at most one match per distinct non-empty sequence
/// string: its default effective sequence plus any associations whose pattern
/// matches, deduplicated by exact sequence text.
pub fn find_matches(window_title: &str, databases: &[Database]) -> Vec<AutoTypeMatch> {
    let mut matches = Vec::new();

    for db in databases {
        for entry in &db.entries {
            if !entry.autotype_enabled {
                continue;
            }

            let mut sequences: HashSet<String> = HashSet::new();

            if entry_matches_window(entry, window_title) {
                let sequence = entry.effective_sequence();
                if !sequence.is_empty() && sequences.insert(sequence.clone()) {
                    matches.push(AutoTypeMatch::new(entry, sequence));
                }
            }

            for assoc in &entry.associations {
                if !title_matches_pattern(window_title, &assoc.window_pattern) {
                    continue;
                }
                let sequence = if assoc.sequence.trim().is_empty() {
                    entry.effective_sequence()
                } else {
                    assoc.sequence.clone()
                };
                if !sequence.is_empty() && sequences.insert(sequence.clone()) {
                    matches.push(AutoTypeMatch::new(entry, sequence));
                }
            }
        }
    }

    debug!(
        matches = matches.len(),
        window_title, "auto-type match search complete"
    );
    matches
}
