use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CoinBalance {
    pub balance: i64,
}

/// Body for `POST /coins/add` and `POST /coins/deduct`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CoinTransaction {
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CoinTransaction {
    pub fn new(amount: i64, reason: Option<&str>) -> Self {
        Self {
            amount,
            reason: reason.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DailyRewardStatus {
    #[serde(alias = "canClaim")]
    pub available: bool,
    #[serde(default)]
    pub streak: u32,
    #[serde(rename = "rewardAmount", default)]
    pub reward_amount: i64,
    #[serde(rename = "nextClaimAt", default)]
    pub next_claim_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DailyRewardClaim {
    #[serde(rename = "rewardAmount")]
    pub reward_amount: i64,
    pub balance: i64,
    #[serde(default)]
    pub streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RewardHistoryEntry {
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl RewardHistoryEntry {
    pub fn display_reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("Reward")
    }
}
