use async_trait::async_trait;

use super::ApiError;
use crate::models::{
    CoinBalance, CoinTransaction, DailyRewardClaim, DailyRewardStatus, ProgressRecord,
    ProgressUpdate, RewardHistoryEntry,
};

/// Backend operations the stores depend on.
///
/// `ApiClient` is the production implementation; tests substitute their own.
/// Every method takes the bearer token explicitly so that implementations
/// stay stateless with respect to the signed-in user.
#[async_trait]
pub trait ProgressService: Send + Sync {
    /// Fetch every progress record for the signed-in learner.
    async fn get_all_progress(&self, token: &str) -> Result<Vec<ProgressRecord>, ApiError>;

    /// Fetch one exercise's record. `Ok(None)` means the learner has no history for it.
    async fn get_exercise_progress(
        &self,
        token: &str,
        exercise_id: &str,
    ) -> Result<Option<ProgressRecord>, ApiError>;

    /// Record an attempt and return the server's canonical record.
    async fn update_quiz_progress(
        &self,
        token: &str,
        exercise_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, ApiError>;

    async fn get_coins_balance(&self, token: &str) -> Result<CoinBalance, ApiError>;

    async fn add_coins(&self, token: &str, tx: &CoinTransaction) -> Result<CoinBalance, ApiError>;

    async fn deduct_coins(&self, token: &str, tx: &CoinTransaction) -> Result<CoinBalance, ApiError>;

    async fn check_daily_reward(&self, token: &str) -> Result<DailyRewardStatus, ApiError>;

    async fn claim_daily_reward(&self, token: &str) -> Result<DailyRewardClaim, ApiError>;

    async fn get_rewards_history(&self, token: &str) -> Result<Vec<RewardHistoryEntry>, ApiError>;
}
