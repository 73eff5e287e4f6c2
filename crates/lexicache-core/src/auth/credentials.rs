use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "lexicache";

/// Bearer tokens kept in the OS keychain, one entry per user id.
pub struct CredentialStore;

impl CredentialStore {
    fn entry(user_id: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, user_id)
            .with_context(|| format!("Failed to open keychain entry for {}", user_id))
    }

    pub fn store_token(user_id: &str, token: &str) -> Result<()> {
        Self::entry(user_id)?
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    /// Token for `user_id`, or `None` when the keychain has no entry.
    pub fn token(user_id: &str) -> Result<Option<String>> {
        match Self::entry(user_id)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read token from keychain"),
        }
    }

    /// Forget the token for `user_id`. Returns whether one was stored.
    pub fn forget(user_id: &str) -> Result<bool> {
        match Self::entry(user_id)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}
