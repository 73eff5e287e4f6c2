use std::sync::Arc;

use thiserror::Error;

use crate::api::ApiError;

/// Failures reported by the stores.
///
/// Expected conditions (nobody signed in, not enough coins) are ordinary
/// variants; the stores never panic on them. Cloneable so that one failed
/// fetch can be reported to every caller that joined it.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Sign in required")]
    AuthRequired,

    #[error("Insufficient coins: balance is {balance}, {requested} requested")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error("Coin amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// The backend rejected the request; the message is meant for the user.
    #[error("{0}")]
    Application(String),

    #[error("Transport error: {0}")]
    Transport(Arc<ApiError>),
}

impl StoreError {
    /// True for failures where serving stale data is the right response.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transport(_) | StoreError::Application(_))
    }
}

impl From<Arc<ApiError>> for StoreError {
    fn from(err: Arc<ApiError>) -> Self {
        match err.as_ref() {
            ApiError::Unauthorized => StoreError::AuthRequired,
            ApiError::Application(message) => StoreError::Application(message.clone()),
            _ => StoreError::Transport(err),
        }
    }
}

impl From<ApiError> for StoreError {
    fn from(err: ApiError) -> Self {
        Arc::new(err).into()
    }
}
