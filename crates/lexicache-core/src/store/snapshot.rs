use chrono::{DateTime, Utc};

use crate::StoreError;

/// Where the data in a `Snapshot` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Served from a fresh cache entry
    Cache,
    /// Fetched just now
    Network,
    /// An older cache entry served because a fetch was not possible
    Stale,
    /// Nothing usable was cached; `data` is an empty default
    Default,
}

/// Result of a read. Reads always produce data to render; a failure is
/// attached as `error` instead of replacing the data.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub data: T,
    pub source: Source,
    pub fetched_at: Option<DateTime<Utc>>,
    pub error: Option<StoreError>,
}

impl<T> Snapshot<T> {
    pub(crate) fn cached(data: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            data,
            source: Source::Cache,
            fetched_at: Some(fetched_at),
            error: None,
        }
    }

    pub(crate) fn network(data: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            data,
            source: Source::Network,
            fetched_at: Some(fetched_at),
            error: None,
        }
    }

    pub(crate) fn stale(data: T, fetched_at: DateTime<Utc>, error: Option<StoreError>) -> Self {
        Self {
            data,
            source: Source::Stale,
            fetched_at: Some(fetched_at),
            error,
        }
    }

    pub(crate) fn placeholder(data: T, error: Option<StoreError>) -> Self {
        Self {
            data,
            source: Source::Default,
            fetched_at: None,
            error,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self.source, Source::Cache | Source::Network)
    }

    /// Error screens are for first loads only: once something was fetched,
    /// stale data is shown instead.
    pub fn should_show_error(&self) -> bool {
        self.error.is_some() && self.source == Source::Default
    }
}
