//! Authentication module for sessions, credentials and user identity.
//!
//! This module provides:
//! - `TokenProvider`: the credential check every store performs before a network call
//! - `Session`: persisted session metadata with the token kept in the keychain
//! - `CredentialStore`: secure OS-level token storage via keyring
//! - `IdentityGuard`: detects when the signed-in user changes

pub mod credentials;
pub mod identity;
pub mod provider;
pub mod session;

pub use credentials::CredentialStore;
pub use identity::IdentityGuard;
pub use provider::{StaticToken, TokenProvider};
pub use session::{Session, SessionData};
