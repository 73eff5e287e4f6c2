//! Shared fixtures for store tests: an in-memory backend with call counters,
//! switchable failures and a gate that holds requests open.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use lexicache_core::api::{ApiError, ProgressService};
use lexicache_core::auth::StaticToken;
use lexicache_core::cache::{KeyValueStore, MemoryStore};
use lexicache_core::catalog::SharedCatalog;
use lexicache_core::clock::Clock;
use lexicache_core::config::StoreSettings;
use lexicache_core::models::{
    Attempt, CategoryTotals, CoinBalance, CoinTransaction, DailyRewardClaim, DailyRewardStatus,
    ProgressRecord, ProgressUpdate, RewardHistoryEntry,
};
use lexicache_core::store::{CoinStore, ProgressStore};

pub const USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";
pub const DAILY_REWARD: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    Server,
    Unauthorized,
    Rejected,
}

pub struct MockService {
    records: Mutex<Vec<ProgressRecord>>,
    balance: Mutex<i64>,
    failure: Mutex<Failure>,
    gate: Mutex<Option<Arc<Notify>>>,
    progress_gate: Mutex<Option<Arc<Notify>>>,
    entered: Mutex<Arc<Notify>>,
    progress_calls: AtomicUsize,
    exercise_calls: AtomicUsize,
    update_calls: AtomicUsize,
    coin_calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Self::with_records(Vec::new())
    }

    pub fn with_records(records: Vec<ProgressRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            balance: Mutex::new(0),
            failure: Mutex::new(Failure::None),
            gate: Mutex::new(None),
            progress_gate: Mutex::new(None),
            entered: Mutex::new(Arc::new(Notify::new())),
            progress_calls: AtomicUsize::new(0),
            exercise_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            coin_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_balance(&self, balance: i64) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn server_balance(&self) -> i64 {
        *self.balance.lock().unwrap()
    }

    pub fn set_records(&self, records: Vec<ProgressRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn fail_with(&self, failure: Failure) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Hold every request open until `release` is called.
    pub fn hold(&self) {
        *self.entered.lock().unwrap() = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    /// Hold only collection reads open until `release_progress`. Other
    /// requests go through.
    pub fn hold_progress(&self) {
        *self.entered.lock().unwrap() = Arc::new(Notify::new());
        *self.progress_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release_progress(&self) {
        if let Some(gate) = self.progress_gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    /// Resolves once a request made after `hold` has reached the backend.
    pub async fn entered(&self) {
        let entered = self.entered.lock().unwrap().clone();
        entered.notified().await;
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub fn progress_calls(&self) -> usize {
        self.progress_calls.load(Ordering::SeqCst)
    }

    pub fn exercise_calls(&self) -> usize {
        self.exercise_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn coin_calls(&self) -> usize {
        self.coin_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), ApiError> {
        let entered = self.entered.lock().unwrap().clone();
        entered.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = *self.failure.lock().unwrap();
        match failure {
            Failure::None => Ok(()),
            Failure::Server => Err(ApiError::ServerError("HTTP 503: unavailable".to_string())),
            Failure::Unauthorized => Err(ApiError::Unauthorized),
            Failure::Rejected => Err(ApiError::Application("Request rejected".to_string())),
        }
    }
}

#[async_trait]
impl ProgressService for MockService {
    async fn get_all_progress(&self, _token: &str) -> Result<Vec<ProgressRecord>, ApiError> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        // The response reflects the records at the time the request arrived
        let records = self.records.lock().unwrap().clone();
        let gate = self.progress_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.entered.lock().unwrap().clone().notify_one();
            gate.notified().await;
        }
        self.enter().await?;
        Ok(records)
    }

    async fn get_exercise_progress(
        &self,
        _token: &str,
        exercise_id: &str,
    ) -> Result<Option<ProgressRecord>, ApiError> {
        self.exercise_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let records = self.records.lock().unwrap();
        Ok(records.iter().find(|r| r.exercise_id == exercise_id).cloned())
    }

    async fn update_quiz_progress(
        &self,
        _token: &str,
        exercise_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, ApiError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let mut records = self.records.lock().unwrap();
        let index = match records.iter().position(|r| r.exercise_id == exercise_id) {
            Some(index) => index,
            None => {
                records.push(ProgressRecord::empty(exercise_id));
                records.len() - 1
            }
        };
        let record = &mut records[index];
        record.record_attempt(Attempt {
            is_correct: update.is_correct,
            time_spent: update.time_spent,
            attempt_date: Utc::now(),
            user_answer: update.user_answer.clone(),
        });
        if update.completed {
            record.completed = true;
        }
        Ok(record.clone())
    }

    async fn get_coins_balance(&self, _token: &str) -> Result<CoinBalance, ApiError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(CoinBalance {
            balance: self.server_balance(),
        })
    }

    async fn add_coins(&self, _token: &str, transaction: &CoinTransaction) -> Result<CoinBalance, ApiError> {
        self.coin_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut balance = self.balance.lock().unwrap();
        *balance += transaction.amount;
        Ok(CoinBalance { balance: *balance })
    }

    async fn deduct_coins(&self, _token: &str, transaction: &CoinTransaction) -> Result<CoinBalance, ApiError> {
        self.coin_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut balance = self.balance.lock().unwrap();
        if *balance < transaction.amount {
            return Err(ApiError::Application("Insufficient coins".to_string()));
        }
        *balance -= transaction.amount;
        Ok(CoinBalance { balance: *balance })
    }

    async fn check_daily_reward(&self, _token: &str) -> Result<DailyRewardStatus, ApiError> {
        self.enter().await?;
        Ok(DailyRewardStatus {
            available: true,
            streak: 3,
            reward_amount: DAILY_REWARD,
            next_claim_at: None,
        })
    }

    async fn claim_daily_reward(&self, _token: &str) -> Result<DailyRewardClaim, ApiError> {
        self.enter().await?;
        let mut balance = self.balance.lock().unwrap();
        *balance += DAILY_REWARD;
        Ok(DailyRewardClaim {
            reward_amount: DAILY_REWARD,
            balance: *balance,
            streak: 4,
        })
    }

    async fn get_rewards_history(&self, _token: &str) -> Result<Vec<RewardHistoryEntry>, ApiError> {
        self.enter().await?;
        Ok(vec![RewardHistoryEntry {
            amount: DAILY_REWARD,
            reason: Some("Daily reward".to_string()),
            created_at: Utc::now(),
        }])
    }
}

/// A record with `attempts` wrong attempts, completed or not.
pub fn record(exercise_id: &str, attempts: usize, completed: bool) -> ProgressRecord {
    let mut record = ProgressRecord::empty(exercise_id);
    for i in 0..attempts {
        record.record_attempt(Attempt {
            is_correct: false,
            time_spent: 10.0 + i as f64,
            attempt_date: Utc::now(),
            user_answer: Some(format!("answer {}", i)),
        });
    }
    record.completed = completed;
    record
}

pub fn catalog() -> CategoryTotals {
    CategoryTotals {
        vocabulary: 4,
        grammar: 2,
        pronunciation: 3,
    }
}

pub fn progress_store(service: &Arc<MockService>, clock: &Clock) -> ProgressStore {
    progress_store_with_token(service, clock, StaticToken::new("test-token"))
}

pub fn progress_store_with_token(service: &Arc<MockService>, clock: &Clock, token: StaticToken) -> ProgressStore {
    ProgressStore::with_clock(
        service.clone(),
        Arc::new(token),
        Arc::new(SharedCatalog::new(catalog())),
        StoreSettings::default(),
        clock.clone(),
    )
}

pub fn coin_store(service: &Arc<MockService>, kv: &Arc<MemoryStore>) -> CoinStore {
    coin_store_with_token(service, kv, StaticToken::new("test-token"))
}

pub fn coin_store_with_token(service: &Arc<MockService>, kv: &Arc<MemoryStore>, token: StaticToken) -> CoinStore {
    let kv: Arc<dyn KeyValueStore> = kv.clone();
    CoinStore::new(service.clone(), Arc::new(token), kv, StoreSettings::default())
}
