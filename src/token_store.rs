//! Portal restore-token persistence
//!
//! The Wayland remote-desktop portal hands back an opaque restore token when
//! a session is granted. Persisting it in the OS keyring lets later sessions
//! (and later process runs) skip the interactive consent dialog.

use crate::error::{AutoTypeError, Result};

const KEYRING_SERVICE: &str = "vault-autotype";
const KEYRING_USERNAME: &str = "portal-restore-token";

fn keyring_entry() -> Result<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
        .map_err(|e| AutoTypeError::Keyring(e.to_string()))
}

pub fn load_restore_token() -> Result<Option<String>> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(AutoTypeError::Keyring(e.to_string())),
    }
}

pub fn save_restore_token(token: &str) -> Result<()> {
    let entry = keyring_entry()?;
    entry
        .set_password(token)
        .map_err(|e| AutoTypeError::Keyring(e.to_string()))
}

pub fn clear_restore_token() -> Result<()> {
    let entry = keyring_entry()?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(AutoTypeError::Keyring(e.to_string())),
    }
}
