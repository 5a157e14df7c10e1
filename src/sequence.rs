//! Sequence Parser
//!
//! Tokenizes a sequence template into an ordered list of typed actions. Pure
//! function, no I/O: placeholders are resolved against the live entry at call
//! time (which is execution start), or only name-checked in syntax-only mode.
//!
//! Grammar (case-insensitive placeholder names):
//! - literal characters type themselves
//! - `{NAME}` and `{NAME=ARG}` are placeholders: field references
//!   (`USERNAME`, `PASSWORD`, `TOTP`, `S:attr`, custom attribute names), key
//!   names (`ENTER`, `TAB`, ...) with an optional repeat count (`{TAB 3}`),
//!   and timing directives (`{DELAY=n}`, `{WAIT=n}`)
//! - `{{}` and `{}}` escape literal braces; `{+}`, `{^}`, `{%}`, `{~}`
//!   escape the modifier prefixes and the tilde
//! - `+`, `^`, `%` hold Shift/Ctrl/Alt for the next key; `~` presses Enter

use crate::error::ParseError;
use crate::platform::WindowId;
use crate::store::EntryView;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::warn;

/// Delays beyond this are rejected at parse time so a typo cannot wedge the
/// exclusivity lock for minutes
const MAX_DELAY_MS: u64 = 60_000;

/// Upper bound for `{KEY n}` repeat counts
const MAX_REPEAT: u32 = 100;

/// A named or character key to synthesize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Backspace,
    Delete,
    Insert,
    Space,
    Escape,
    /// F1..=F16
    Function(u8),
    Char(char),
}

impl Key {
    /// Look up a key by its placeholder name, case-insensitively
    pub fn from_name(name: &str) -> Option<Key> {
        let upper = name.to_ascii_uppercase();
        let key = match upper.as_str() {
            "ENTER" | "RETURN" => Key::Enter,
            "TAB" => Key::Tab,
            "UP" => Key::Up,
            "DOWN" => Key::Down,
            "LEFT" => Key::Left,
            "RIGHT" => Key::Right,
            "HOME" => Key::Home,
            "END" => Key::End,
            "PGUP" | "PAGEUP" => Key::PageUp,
            "PGDN" | "PAGEDOWN" => Key::PageDown,
            "BACKSPACE" | "BS" | "BKSP" => Key::Backspace,
            "DEL" | "DELETE" => Key::Delete,
            "INS" | "INSERT" => Key::Insert,
            "SPACE" => Key::Space,
            "ESC" | "ESCAPE" => Key::Escape,
            _ => {
                if let Some(num) = upper.strip_prefix('F') {
                    if let Ok(n) = num.parse::<u8>() {
                        if (1..=16).contains(&n) {
                            return Some(Key::Function(n));
                        }
                    }
                }
                return None;
            }
        };
        Some(key)
    }

    /// X11/xkb keysym for this key, used by the X11 and Wayland backends
    pub fn keysym(&self) -> u32 {
        match self {
            Key::Enter => 0xff0d,
            Key::Tab => 0xff09,
            Key::Up => 0xff52,
            Key::Down => 0xff54,
            Key::Left => 0xff51,
            Key::Right => 0xff53,
            Key::Home => 0xff50,
            Key::End => 0xff57,
            Key::PageUp => 0xff55,
            Key::PageDown => 0xff56,
            Key::Backspace => 0xff08,
            Key::Delete => 0xffff,
            Key::Insert => 0xff63,
            Key::Space => 0x20,
            Key::Escape => 0xff1b,
            Key::Function(n) => 0xffbe + (*n as u32 - 1),
            // Latin-1 codepoints are their own keysym; everything else uses
            // the Unicode keysym range
            Key::Char(c) => {
                let cp = *c as u32;
                if cp < 0x100 {
                    cp
                } else {
                    cp | 0x0100_0000
                }
            }
        }
    }
}

/// Modifier keys held for a single synthesized key press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    pub fn is_empty(&self) -> bool {
        *self == Modifiers::NONE
    }
}

/// One step of an auto-type run
///
/// Action lists are created fresh per run by the parser and discarded after.
/// `TypeText` payloads are secret values; Debug output is redacted.
#[derive(Clone)]
pub enum Action {
    /// Activate the target window and verify focus before typing starts
    Begin { window: Option<WindowId> },
    /// Synthesize one (possibly modified) key press
    TypeKey { key: Key, modifiers: Modifiers },
    /// Type a run of text character by character
    TypeText(SecretString),
    /// Suspend for the given number of milliseconds
    Delay(u64),
    /// No-op at the platform level; marks that subsequent placeholders for
    /// the same field must re-read the live value
    ClearField,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Begin { window } => f.debug_struct("Begin").field("window", window).finish(),
            Action::TypeKey { key, modifiers } => f
                .debug_struct("TypeKey")
                .field("key", key)
                .field("modifiers", modifiers)
                .finish(),
            Action::TypeText(text) => write!(
                f,
                "TypeText([REDACTED {} chars])",
                text.expose_secret().chars().count()
            ),
            Action::Delay(ms) => f.debug_tuple("Delay").field(ms).finish(),
            Action::ClearField => write!(f, "ClearField"),
        }
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Action::Begin { window: a }, Action::Begin { window: b }) => a == b,
            (
                Action::TypeKey {
                    key: k1,
                    modifiers: m1,
                },
                Action::TypeKey {
                    key: k2,
                    modifiers: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (Action::TypeText(a), Action::TypeText(b)) => {
                a.expose_secret() == b.expose_secret()
            }
            (Action::Delay(a), Action::Delay(b)) => a == b,
            (Action::ClearField, Action::ClearField) => true,
            _ => false,
        }
    }
}

/// Validate a sequence template against an entry without resolving secrets
///
/// Used for pre-save validation in the UI; confirms the grammar and that every
/// referenced field or attribute exists, never reading actual values.
pub fn verify_sequence_syntax(
    template: &str,
    entry: &dyn EntryView,
) -> Result<(), ParseError> {
    parse_sequence(template, entry, true).map(|_| ())
}

/// Parse a sequence template into an ordered action list
///
/// With `syntax_only` set, field placeholders are name-checked but produce no
/// output and no secret value is read. Parsing is deterministic: the same
/// template and entry state always yield a structurally equal action list.
pub fn parse_sequence(
    template: &str,
    entry: &dyn EntryView,
    syntax_only: bool,
) -> Result<Vec<Action>, ParseError> {
    if template.trim().is_empty() {
        return Err(ParseError::EmptySequence);
    }

    let mut actions = Vec::new();
    let mut literal = String::new();
    let mut modifiers = Modifiers::NONE;
    let chars: Vec<(usize, char)> = template.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        match ch {
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|(_, c)| *c == '}')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| ParseError::MalformedPlaceholder {
                        fragment: template[pos..].to_string(),
                        position: pos,
                    })?;
                // "{}}" escapes a literal closing brace
                let close = if close == i + 1 && chars.get(i + 2).map(|(_, c)| *c) == Some('}') {
                    i + 2
                } else {
                    close
                };
                let token: String = chars[i + 1..close].iter().map(|(_, c)| *c).collect();
                if token.is_empty() {
                    return Err(ParseError::MalformedPlaceholder {
                        fragment: "{}".to_string(),
                        position: pos,
                    });
                }
                // Brace and modifier-prefix escapes stay part of the literal
                // run; everything else is a placeholder
                if let Some(escaped @ ('{' | '}' | '+' | '^' | '%' | '~')) = single_char(&token) {
                    literal.push(escaped);
                } else {
                    flush_literal(&mut literal, &mut actions, syntax_only);
                    parse_placeholder(
                        &token,
                        pos,
                        entry,
                        syntax_only,
                        &mut modifiers,
                        &mut actions,
                    )?;
                }
                i = close + 1;
            }
            '}' => {
                return Err(ParseError::MalformedPlaceholder {
                    fragment: "}".to_string(),
                    position: pos,
                });
            }
            '+' => {
                modifiers.shift = true;
                i += 1;
            }
            '^' => {
                modifiers.ctrl = true;
                i += 1;
            }
            '%' => {
                modifiers.alt = true;
                i += 1;
            }
            '~' => {
                flush_literal(&mut literal, &mut actions, syntax_only);
                push_key(Key::Enter, &mut modifiers, 1, &mut actions, syntax_only);
                i += 1;
            }
            _ => {
                if modifiers.is_empty() {
                    literal.push(ch);
                } else {
                    flush_literal(&mut literal, &mut actions, syntax_only);
                    push_key(Key::Char(ch), &mut modifiers, 1, &mut actions, syntax_only);
                }
                i += 1;
            }
        }
    }

    flush_literal(&mut literal, &mut actions, syntax_only);
    if !modifiers.is_empty() {
        warn!("trailing modifier prefix in sequence has no key to apply to");
    }
    Ok(actions)
}

fn flush_literal(literal: &mut String, actions: &mut Vec<Action>, syntax_only: bool) {
    if !literal.is_empty() {
        if !syntax_only {
            actions.push(Action::TypeText(SecretString::from(std::mem::take(
                literal,
            ))));
        } else {
            literal.clear();
        }
    }
}

fn push_key(
    key: Key,
    modifiers: &mut Modifiers,
    count: u32,
    actions: &mut Vec<Action>,
    syntax_only: bool,
) {
    let mods = std::mem::take(modifiers);
    if syntax_only {
        return;
    }
    for _ in 0..count {
        actions.push(Action::TypeKey {
            key,
            modifiers: mods,
        });
    }
}

fn parse_placeholder(
    token: &str,
    pos: usize,
    entry: &dyn EntryView,
    syntax_only: bool,
    modifiers: &mut Modifiers,
    actions: &mut Vec<Action>,
) -> Result<(), ParseError> {
    let malformed = |fragment: &str| ParseError::MalformedPlaceholder {
        fragment: format!("{{{fragment}}}"),
        position: pos,
    };

    // {NAME=ARG} form: timing directives
    if let Some((name, arg)) = token.split_once('=') {
        match name.to_ascii_uppercase().as_str() {
            "DELAY" | "WAIT" => {
                let ms: u64 = arg.trim().parse().map_err(|_| malformed(token))?;
                if ms == 0 || ms > MAX_DELAY_MS {
                    return Err(malformed(token));
                }
                if !syntax_only {
                    actions.push(Action::Delay(ms));
                }
                return Ok(());
            }
            _ => return Err(malformed(token)),
        }
    }

    // {KEY n} repeat form
    let (name, repeat) = match token.split_once(char::is_whitespace) {
        Some((name, count)) => {
            let n: u32 = count.trim().parse().map_err(|_| malformed(token))?;
            if n == 0 || n > MAX_REPEAT {
                return Err(malformed(token));
            }
            (name, n)
        }
        None => (token, 1),
    };

    if let Some(key) = Key::from_name(name) {
        push_key(key, modifiers, repeat, actions, syntax_only);
        return Ok(());
    }

    if name.eq_ignore_ascii_case("CLEARFIELD") {
        if !syntax_only {
            actions.push(Action::ClearField);
        }
        return Ok(());
    }

    // Field references: built-ins, {S:attr}, and bare custom attribute names.
    // Each occurrence is resolved independently so a field mutated
    // mid-sequence is re-read fresh.
    let field = name.strip_prefix("S:").or_else(|| name.strip_prefix("s:")).unwrap_or(name);
    if repeat != 1 {
        return Err(malformed(token));
    }
    if !entry.has_field(field) {
        return Err(ParseError::UnknownPlaceholder {
            name: name.to_string(),
            position: pos,
        });
    }
    if !syntax_only {
        let value = entry
            .resolve_field(field)
            .ok_or_else(|| ParseError::UnknownPlaceholder {
                name: name.to_string(),
                position: pos,
            })?;
        actions.push(Action::TypeText(value));
    }
    Ok(())
}

fn single_char(token: &str) -> Option<char> {
    let mut it = token.chars();
    match (it.next(), it.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Entry;

    fn test_entry() -> Entry {
        let mut entry = Entry::new("GitHub", "alice", "s3cret");
        entry.totp = Some("123456".to_string());
        entry
            .attributes
            .insert("PIN".to_string(), "0000".to_string());
        entry
    }

    #[test]
    fn test_default_sequence_end_to_end() {
        let entry = test_entry();
        let actions = parse_sequence("{USERNAME}{TAB}{PASSWORD}{ENTER}", &entry, false).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::TypeText(SecretString::from("alice".to_string())),
                Action::TypeKey {
                    key: Key::Tab,
                    modifiers: Modifiers::NONE
                },
                Action::TypeText(SecretString::from("s3cret".to_string())),
                Action::TypeKey {
                    key: Key::Enter,
                    modifiers: Modifiers::NONE
                },
            ]
        );
    }

    #[test]
    fn test_unknown_placeholder_names_offender() {
        let entry = test_entry();
        let err = parse_sequence("{UNKNOWNFIELD}", &entry, false).unwrap_err();
        match err {
            ParseError::UnknownPlaceholder { name, position } => {
                assert_eq!(name, "UNKNOWNFIELD");
                assert_eq!(position, 0);
            }
            other => panic!("expected UnknownPlaceholder, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_is_idempotent() {
        let entry = test_entry();
        let template = "user: {USERNAME}{DELAY=20}+{TAB 2}{S:PIN}~";
        let first = parse_sequence(template, &entry, false).unwrap();
        let second = parse_sequence(template, &entry, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_literal_runs_coalesce() {
        let entry = test_entry();
        let actions = parse_sequence("hello world", &entry, false).unwrap();
        assert_eq!(
            actions,
            vec![Action::TypeText(SecretString::from("hello world".to_string()))]
        );
    }

    #[test]
    fn test_case_insensitive_names() {
        let entry = test_entry();
        let actions = parse_sequence("{username}{tab}{Totp}", &entry, false).unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(
            actions[2],
            Action::TypeText(SecretString::from("123456".to_string()))
        );
    }

    #[test]
    fn test_custom_attribute_bare_and_prefixed() {
        let entry = test_entry();
        let bare = parse_sequence("{PIN}", &entry, false).unwrap();
        let prefixed = parse_sequence("{S:PIN}", &entry, false).unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(
            bare,
            vec![Action::TypeText(SecretString::from("0000".to_string()))]
        );
    }

    #[test]
    fn test_brace_and_prefix_escapes() {
        let entry = test_entry();
        let actions = parse_sequence("a{{}b{}}c{+}{~}", &entry, false).unwrap();
        assert_eq!(
            actions,
            vec![Action::TypeText(SecretString::from("a{b}c+~".to_string()))]
        );
    }

    #[test]
    fn test_modifier_prefixes() {
        let entry = test_entry();
        let actions = parse_sequence("^a+{TAB}", &entry, false).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::TypeKey {
                    key: Key::Char('a'),
                    modifiers: Modifiers {
                        ctrl: true,
                        ..Modifiers::NONE
                    }
                },
                Action::TypeKey {
                    key: Key::Tab,
                    modifiers: Modifiers {
                        shift: true,
                        ..Modifiers::NONE
                    }
                },
            ]
        );
    }

    #[test]
    fn test_delay_and_wait() {
        let entry = test_entry();
        let actions = parse_sequence("{DELAY=100}{WAIT=250}", &entry, false).unwrap();
        assert_eq!(actions, vec![Action::Delay(100), Action::Delay(250)]);

        assert!(matches!(
            parse_sequence("{DELAY=abc}", &entry, false),
            Err(ParseError::MalformedPlaceholder { .. })
        ));
        assert!(matches!(
            parse_sequence("{DELAY=999999}", &entry, false),
            Err(ParseError::MalformedPlaceholder { .. })
        ));
    }

    #[test]
    fn test_key_repeat() {
        let entry = test_entry();
        let actions = parse_sequence("{TAB 3}", &entry, false).unwrap();
        assert_eq!(actions.len(), 3);
        assert!(matches!(
            parse_sequence("{TAB 0}", &entry, false),
            Err(ParseError::MalformedPlaceholder { .. })
        ));
        assert!(matches!(
            parse_sequence("{TAB 500}", &entry, false),
            Err(ParseError::MalformedPlaceholder { .. })
        ));
    }

    #[test]
    fn test_unbalanced_braces() {
        let entry = test_entry();
        assert!(matches!(
            parse_sequence("{USERNAME", &entry, false),
            Err(ParseError::MalformedPlaceholder { .. })
        ));
        assert!(matches!(
            parse_sequence("abc}def", &entry, false),
            Err(ParseError::MalformedPlaceholder { .. })
        ));
    }

    #[test]
    fn test_empty_sequence() {
        let entry = test_entry();
        assert_eq!(
            parse_sequence("", &entry, false).unwrap_err(),
            ParseError::EmptySequence
        );
        assert_eq!(
            parse_sequence("   ", &entry, false).unwrap_err(),
            ParseError::EmptySequence
        );
    }

    #[test]
    fn test_clearfield_action() {
        let entry = test_entry();
        let actions = parse_sequence("{CLEARFIELD}{USERNAME}", &entry, false).unwrap();
        assert_eq!(actions[0], Action::ClearField);
    }

    #[test]
    fn test_syntax_only_never_reads_secrets() {
        struct TrippedEntry;
        impl crate::store::EntryView for TrippedEntry {
            fn has_field(&self, name: &str) -> bool {
                name.eq_ignore_ascii_case("USERNAME") || name.eq_ignore_ascii_case("PASSWORD")
            }
            fn resolve_field(&self, _name: &str) -> Option<SecretString> {
                panic!("syntax-only validation must not resolve field values");
            }
        }

        verify_sequence_syntax("{USERNAME}{TAB}{PASSWORD}{ENTER}", &TrippedEntry).unwrap();

        let err = verify_sequence_syntax("{NOPE}", &TrippedEntry).unwrap_err();
        assert!(matches!(err, ParseError::UnknownPlaceholder { .. }));
    }

    #[test]
    fn test_action_debug_redacts_text() {
        let action = Action::TypeText(SecretString::from("s3cret".to_string()));
        let rendered = format!("{action:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_keysym_mapping() {
        assert_eq!(Key::Enter.keysym(), 0xff0d);
        assert_eq!(Key::Tab.keysym(), 0xff09);
        assert_eq!(Key::Function(1).keysym(), 0xffbe);
        assert_eq!(Key::Char('a').keysym(), 0x61);
        assert_eq!(Key::Char('€').keysym(), 0x20ac | 0x0100_0000);
    }
}
