use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CredentialStore, TokenProvider};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Token lifetime in days. The backend issues long-lived tokens to the
/// mobile client; the CLI asks for a new one after this.
const TOKEN_EXPIRY_DAYS: i64 = 30;

/// Buffer time before expiry to suggest signing in again
const TOKEN_REFRESH_BUFFER_DAYS: i64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Kept in the OS keychain, never written to the session file
    #[serde(skip)]
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.created_at + Duration::days(TOKEN_EXPIRY_DAYS)
    }

    /// Check if the session will expire soon and should be renewed
    pub fn needs_refresh(&self) -> bool {
        let refresh_at =
            self.created_at + Duration::days(TOKEN_EXPIRY_DAYS - TOKEN_REFRESH_BUFFER_DAYS);
        Utc::now() > refresh_at
    }
}

pub struct Session {
    cache_dir: PathBuf,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data: None,
        }
    }

    /// Load session from disk and its token from the keychain
    pub fn load(&mut self) -> Result<bool> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(false);
        }

        let contents = std::fs::read_to_string(&path)
            .context("Failed to read session file")?;
        let mut data: SessionData = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;

        if data.is_expired() {
            debug!(user_id = %data.user_id, "Stored session expired");
            return Ok(false);
        }

        match CredentialStore::token(&data.user_id) {
            Ok(Some(token)) => {
                data.token = token;
                self.data = Some(data);
                Ok(true)
            }
            Ok(None) => {
                warn!(user_id = %data.user_id, "Session found but no token in keychain");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, user_id = %data.user_id, "Keychain unavailable");
                Ok(false)
            }
        }
    }

    /// Save session to disk and its token to the keychain
    pub fn save(&self) -> Result<()> {
        if let Some(ref data) = self.data {
            CredentialStore::store_token(&data.user_id, &data.token)?;
            let path = self.session_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(data)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    /// Clear session data and forget the stored token
    pub fn clear(&mut self) -> Result<()> {
        if let Some(data) = self.data.take() {
            match CredentialStore::forget(&data.user_id) {
                Ok(true) => {}
                Ok(false) => debug!(user_id = %data.user_id, "No keychain entry to delete"),
                Err(e) => warn!(error = %e, "Failed to delete keychain entry"),
            }
        }
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Update session with new data
    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    /// Get the user ID if session exists
    pub fn user_id(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.user_id.as_str())
    }

    /// Check if session is valid (exists, has a token and is not expired)
    pub fn is_valid(&self) -> bool {
        self.data
            .as_ref()
            .map(|d| !d.token.is_empty() && !d.is_expired())
            .unwrap_or(false)
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl TokenProvider for Session {
    fn token(&self) -> Option<String> {
        if self.is_valid() {
            self.data.as_ref().map(|d| d.token.clone())
        } else {
            None
        }
    }
}
