//! API client for communicating with the learning backend's REST API.
//!
//! This module provides the `ApiClient` struct, the `reqwest` implementation
//! of `ProgressService`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::envelope::{Envelope, ExerciseProgress, ProgressList, RewardHistory};
use super::{ApiError, ProgressService};
use crate::models::{
    CoinBalance, CoinTransaction, DailyRewardClaim, DailyRewardStatus, ProgressRecord,
    ProgressUpdate, RewardHistoryEntry,
};

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the backend API
pub const DEFAULT_API_BASE_URL: &str = "https://api.lexicache.app/api";

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the learning backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client against `base_url` with the default timeout
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot have paths appended: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build an endpoint URL from path segments. Segments are percent-encoded,
    /// so exercise ids can never escape their path position.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if status.as_u16() == 429 {
            return Ok(None);
        }

        let body = response.text().await.unwrap_or_default();

        // Validation failures come back as 4xx with the usual envelope; keep their message
        if status.is_client_error() && status.as_u16() != 401 {
            if let Ok(envelope) = serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
                if !envelope.success {
                    return Err(ApiError::application(envelope.message));
                }
            }
        }

        Err(ApiError::from_status(status, &body))
    }

    /// Send a request, retrying on 429 with exponential backoff, and decode the envelope.
    async fn send<T, F>(&self, url: &Url, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build()
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let envelope: Envelope<T> = response.json().await?;
                    return envelope.into_result();
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, token: &str, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.endpoint(segments);
        debug!(url = %url, "GET");
        self.send(&url, || self.client.get(url.clone()).bearer_auth(token))
            .await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        token: &str,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(segments);
        debug!(url = %url, "POST");
        self.send(&url, || self.client.post(url.clone()).bearer_auth(token).json(body))
            .await
    }

    async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        token: &str,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(segments);
        debug!(url = %url, "PUT");
        self.send(&url, || self.client.put(url.clone()).bearer_auth(token).json(body))
            .await
    }
}

#[async_trait]
impl ProgressService for ApiClient {
    async fn get_all_progress(&self, token: &str) -> Result<Vec<ProgressRecord>, ApiError> {
        let list: ProgressList = self.get(token, &["progress"]).await?;
        debug!(count = list.progress.len(), "Progress records received");
        Ok(list.progress)
    }

    async fn get_exercise_progress(
        &self,
        token: &str,
        exercise_id: &str,
    ) -> Result<Option<ProgressRecord>, ApiError> {
        match self.get::<ExerciseProgress>(token, &["progress", exercise_id]).await {
            Ok(response) => Ok(response.progress),
            // Untouched exercises are reported as 404 by some deployments
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_quiz_progress(
        &self,
        token: &str,
        exercise_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, ApiError> {
        let response: ExerciseProgress = self
            .put(token, &["progress", "quiz", exercise_id], update)
            .await?;
        response.progress.ok_or_else(|| {
            ApiError::InvalidResponse(format!("No progress returned for {}", exercise_id))
        })
    }

    async fn get_coins_balance(&self, token: &str) -> Result<CoinBalance, ApiError> {
        self.get(token, &["coins", "balance"]).await
    }

    async fn add_coins(&self, token: &str, tx: &CoinTransaction) -> Result<CoinBalance, ApiError> {
        self.post(token, &["coins", "add"], tx).await
    }

    async fn deduct_coins(&self, token: &str, tx: &CoinTransaction) -> Result<CoinBalance, ApiError> {
        self.post(token, &["coins", "deduct"], tx).await
    }

    async fn check_daily_reward(&self, token: &str) -> Result<DailyRewardStatus, ApiError> {
        self.get(token, &["rewards", "daily"]).await
    }

    async fn claim_daily_reward(&self, token: &str) -> Result<DailyRewardClaim, ApiError> {
        self.post(token, &["rewards", "daily", "claim"], &serde_json::json!({}))
            .await
    }

    async fn get_rewards_history(&self, token: &str) -> Result<Vec<RewardHistoryEntry>, ApiError> {
        let history: RewardHistory = self.get(token, &["rewards", "history"]).await?;
        Ok(history.history)
    }
}
