//! The progress and coin stores.
//!
//! Both are explicit service objects: construct them with their
//! dependencies, share them behind an `Arc`, and pass the active user id
//! into every call.

pub mod coins;
pub mod optimistic;
pub mod progress;
pub mod snapshot;

use std::future::Future;
use std::time::Duration;

pub use coins::CoinStore;
pub use optimistic::{apply_optimistic, Rollback};
pub use progress::{ProgressEvent, ProgressStore};
pub use snapshot::{Snapshot, Source};

use crate::api::ApiError;
use crate::StoreError;

/// Bound a mutation request by the configured timeout.
pub(crate) async fn with_timeout<T, F>(limit: Duration, request: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::from(ApiError::Timeout)),
    }
}
