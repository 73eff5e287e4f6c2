//! Coin balance with optimistic mutations.
//!
//! Adding and deducting coins update the local balance before the request
//! is sent; a failed request applies the exact inverse delta. Daily reward
//! claims only change the balance after the server confirms them. The last
//! confirmed balance is mirrored into the key-value store so it can be shown
//! while offline.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api::{ApiError, ProgressService};
use crate::auth::{IdentityGuard, TokenProvider};
use crate::cache::KeyValueStore;
use crate::clock::Clock;
use crate::config::StoreSettings;
use crate::models::{CoinBalance, CoinTransaction, DailyRewardClaim, DailyRewardStatus, RewardHistoryEntry};
use crate::StoreError;

use super::{apply_optimistic, with_timeout};

#[derive(Default)]
struct CoinState {
    identity: IdentityGuard,
    /// Bumped on identity change and clear; pending mutations from an older
    /// epoch neither commit nor revert.
    epoch: u64,
    balance: i64,
    /// Optimistic mutations sent but not yet answered
    pending: usize,
    synced_at: Option<DateTime<Utc>>,
    daily: Option<DailyRewardStatus>,
}

pub struct CoinStore {
    service: Arc<dyn ProgressService>,
    tokens: Arc<dyn TokenProvider>,
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
    settings: StoreSettings,
    state: Mutex<CoinState>,
}

/// Key-value store key for a user's mirrored balance.
pub fn balance_key(user_id: &str) -> String {
    let safe: String = user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
        .collect();
    format!("coins.balance.{}", safe)
}

impl CoinStore {
    pub fn new(
        service: Arc<dyn ProgressService>,
        tokens: Arc<dyn TokenProvider>,
        kv: Arc<dyn KeyValueStore>,
        settings: StoreSettings,
    ) -> Self {
        Self::with_clock(service, tokens, kv, settings, Clock::system())
    }

    pub fn with_clock(
        service: Arc<dyn ProgressService>,
        tokens: Arc<dyn TokenProvider>,
        kv: Arc<dyn KeyValueStore>,
        settings: StoreSettings,
        clock: Clock,
    ) -> Self {
        Self {
            service,
            tokens,
            kv,
            clock,
            settings,
            state: Mutex::new(CoinState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Accessors =====

    /// Balance as currently displayed, including unconfirmed mutations.
    pub fn balance(&self) -> i64 {
        self.lock().balance
    }

    pub fn pending_mutations(&self) -> usize {
        self.lock().pending
    }

    /// When the balance was last taken from the server.
    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.lock().synced_at
    }

    pub fn daily_status(&self) -> Option<DailyRewardStatus> {
        self.lock().daily.clone()
    }

    // ===== Identity and offline mirror =====

    /// Record `user_id` as the active user. On a change the balance is
    /// replaced by the new user's mirrored balance, or zero.
    pub fn detect_identity_change(&self, user_id: &str) -> bool {
        let changed = {
            let mut state = self.lock();
            let changed = state.identity.observe(user_id);
            if changed {
                let identity = state.identity.clone();
                let epoch = state.epoch + 1;
                *state = CoinState {
                    identity,
                    epoch,
                    ..CoinState::default()
                };
            }
            changed
        };
        if changed {
            self.load_offline_balance(user_id);
        }
        changed
    }

    /// Show the mirrored balance for `user_id` until the first server sync.
    pub fn load_offline_balance(&self, user_id: &str) -> Option<i64> {
        let offline = self.read_mirror(user_id)?;
        let mut state = self.lock();
        let active = state.identity.current().map_or(true, |current| current == user_id);
        if active && state.synced_at.is_none() && state.pending == 0 {
            debug!(balance = offline, "Using offline coin balance");
            state.identity.observe(user_id);
            state.balance = offline;
        }
        Some(offline)
    }

    fn read_mirror(&self, user_id: &str) -> Option<i64> {
        match self.kv.load::<i64>(&balance_key(user_id)) {
            Ok(cached) => cached.map(|c| c.data),
            Err(e) => {
                warn!(error = %e, "Failed to load cached coin balance");
                None
            }
        }
    }

    fn mirror(&self, user_id: &str, balance: i64) {
        if let Err(e) = self.kv.save(&balance_key(user_id), &balance) {
            warn!(error = %e, "Failed to cache coin balance");
        }
    }

    /// Forget the balance and reward status, for example on logout.
    pub fn clear(&self) {
        let mut state = self.lock();
        let epoch = state.epoch + 1;
        *state = CoinState {
            epoch,
            ..CoinState::default()
        };
    }

    fn begin(&self, user_id: &str) -> Result<(String, u64), StoreError> {
        let token = self.tokens.token().ok_or(StoreError::AuthRequired)?;
        self.detect_identity_change(user_id);
        Ok((token, self.lock().epoch))
    }

    // ===== Server reads =====

    /// Fetch the balance from the server. It replaces the displayed balance
    /// unless an optimistic mutation is still pending.
    pub async fn refresh_balance(&self, user_id: &str) -> Result<i64, StoreError> {
        let (token, epoch) = self.begin(user_id)?;
        let CoinBalance { balance } =
            with_timeout(self.settings.request_timeout, self.service.get_coins_balance(&token))
                .await
                .inspect_err(|e| warn!(error = %e, "Failed to fetch coin balance"))?;

        let adopted = {
            let mut state = self.lock();
            if state.epoch == epoch && state.pending == 0 {
                state.balance = balance;
                state.synced_at = Some(self.clock.now());
                true
            } else {
                false
            }
        };
        if adopted {
            self.mirror(user_id, balance);
        }
        debug!(balance, adopted, "Coin balance fetched");
        Ok(balance)
    }

    pub async fn check_daily_reward(&self, user_id: &str) -> Result<DailyRewardStatus, StoreError> {
        let (token, epoch) = self.begin(user_id)?;
        let status = with_timeout(self.settings.request_timeout, self.service.check_daily_reward(&token)).await?;
        let mut state = self.lock();
        if state.epoch == epoch {
            state.daily = Some(status.clone());
        }
        Ok(status)
    }

    pub async fn rewards_history(&self, user_id: &str) -> Result<Vec<RewardHistoryEntry>, StoreError> {
        let (token, _) = self.begin(user_id)?;
        with_timeout(self.settings.request_timeout, self.service.get_rewards_history(&token)).await
    }

    // ===== Mutations =====

    /// Claim today's reward. The balance only changes once the server confirms.
    pub async fn claim_daily_reward(&self, user_id: &str) -> Result<DailyRewardClaim, StoreError> {
        let (token, epoch) = self.begin(user_id)?;
        let claim = with_timeout(self.settings.request_timeout, self.service.claim_daily_reward(&token))
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to claim daily reward"))?;

        let committed = {
            let mut state = self.lock();
            if state.epoch != epoch {
                None
            } else {
                if state.pending == 0 {
                    state.balance = claim.balance;
                    state.synced_at = Some(self.clock.now());
                } else {
                    state.balance += claim.reward_amount;
                }
                if let Some(daily) = state.daily.as_mut() {
                    daily.available = false;
                    daily.streak = claim.streak;
                }
                (state.pending == 0).then_some(state.balance)
            }
        };
        if let Some(balance) = committed {
            self.mirror(user_id, balance);
        }
        info!(reward = claim.reward_amount, streak = claim.streak, "Daily reward claimed");
        Ok(claim)
    }

    /// Add `amount` coins. Returns the balance after the server confirmed.
    pub async fn add_coins(&self, user_id: &str, amount: i64, reason: Option<&str>) -> Result<i64, StoreError> {
        if amount <= 0 {
            return Err(StoreError::InvalidAmount(amount));
        }
        let (token, epoch) = self.begin(user_id)?;
        let transaction = CoinTransaction::new(amount, reason);
        self.apply_delta(user_id, epoch, amount, || self.service.add_coins(&token, &transaction))
            .await
    }

    /// Deduct `amount` coins. Fails with `InsufficientFunds`, without
    /// contacting the server, when the displayed balance is too low.
    pub async fn deduct_coins(&self, user_id: &str, amount: i64, reason: Option<&str>) -> Result<i64, StoreError> {
        if amount <= 0 {
            return Err(StoreError::InvalidAmount(amount));
        }
        let (token, epoch) = self.begin(user_id)?;
        let transaction = CoinTransaction::new(amount, reason);
        self.apply_delta(user_id, epoch, -amount, || self.service.deduct_coins(&token, &transaction))
            .await
    }

    /// `request` is only called once the local balance has been updated.
    async fn apply_delta<S, F>(&self, user_id: &str, epoch: u64, delta: i64, request: S) -> Result<i64, StoreError>
    where
        S: FnOnce() -> F,
        F: Future<Output = Result<CoinBalance, ApiError>>,
    {
        let confirmed = apply_optimistic(
            || {
                let mut state = self.lock();
                if delta < 0 && state.balance < -delta {
                    return Err(StoreError::InsufficientFunds {
                        balance: state.balance,
                        requested: -delta,
                    });
                }
                state.balance += delta;
                state.pending += 1;
                debug!(delta, balance = state.balance, "Coin balance updated optimistically");
                Ok(())
            },
            || with_timeout(self.settings.request_timeout, request()),
            || {
                let mut state = self.lock();
                if state.epoch == epoch {
                    state.balance -= delta;
                    state.pending = state.pending.saturating_sub(1);
                    warn!(delta, balance = state.balance, "Coin update failed, balance reverted");
                }
            },
        )
        .await?;

        let committed = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return Ok(confirmed.balance);
            }
            state.pending = state.pending.saturating_sub(1);
            if state.pending == 0 {
                state.balance = confirmed.balance;
                state.synced_at = Some(self.clock.now());
            }
            (state.pending == 0).then_some(state.balance)
        };

        match committed {
            Some(balance) => {
                self.mirror(user_id, balance);
                info!(delta, balance, "Coin update confirmed");
                Ok(balance)
            }
            None => Ok(self.balance()),
        }
    }
}
