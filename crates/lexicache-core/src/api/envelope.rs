//! Decoding of the backend's `{success, message?, ...fields}` response shape.
//!
//! Every endpoint wraps its payload in the same envelope. `Envelope::into_result`
//! turns it into a plain `Result`, so nothing above the client ever branches
//! on `success` itself.

use serde::Deserialize;

use super::ApiError;
use crate::models::{ProgressRecord, RewardHistoryEntry};

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::application(self.message));
        }
        self.data.ok_or_else(|| {
            ApiError::InvalidResponse("successful response is missing its payload".to_string())
        })
    }
}

/// `GET /progress`
#[derive(Debug, Deserialize)]
pub(crate) struct ProgressList {
    #[serde(alias = "data")]
    pub progress: Vec<ProgressRecord>,
}

/// `GET /progress/{id}` and `PUT /progress/quiz/{id}`. The backend sends
/// `null` for exercises the learner has never touched.
#[derive(Debug, Deserialize)]
pub(crate) struct ExerciseProgress {
    #[serde(default, alias = "data")]
    pub progress: Option<ProgressRecord>,
}

/// `GET /rewards/history`
#[derive(Debug, Deserialize)]
pub(crate) struct RewardHistory {
    #[serde(default, alias = "rewards")]
    pub history: Vec<RewardHistoryEntry>,
}
