//! Data models for learner progress and coins.
//!
//! - `ProgressRecord`, `Attempt`: per-exercise history mirrored from the backend
//! - `ProgressUpdate`: the payload sent when an attempt is recorded
//! - `AggregateProgress`, `CategoryTotals`: derived per-category counts
//! - Coin types: `CoinBalance`, `CoinTransaction`, daily reward status and history

pub mod aggregate;
pub mod coins;
pub mod progress;

pub use aggregate::{AggregateProgress, CategoryProgress, CategoryTotals};
pub use coins::{CoinBalance, CoinTransaction, DailyRewardClaim, DailyRewardStatus, RewardHistoryEntry};
pub use progress::{Attempt, Category, ProgressRecord, ProgressUpdate};
