use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with the bookkeeping needed to decide whether it can
/// still be served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    /// User the data was fetched for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Set by explicit invalidation. The data stays readable as a fallback.
    #[serde(skip)]
    pub invalidated: bool,
    /// Write order; a write carrying an older generation is discarded
    #[serde(skip)]
    pub generation: u64,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self::fetched(data, Utc::now(), None, 0)
    }

    pub fn fetched(data: T, cached_at: DateTime<Utc>, owner: Option<String>, generation: u64) -> Self {
        Self {
            data,
            cached_at,
            owner,
            invalidated: false,
            generation,
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.cached_at
    }

    pub fn age_minutes(&self) -> i64 {
        self.age_at(Utc::now()).num_minutes()
    }

    /// Servable without a refetch: younger than `expiry`, not invalidated,
    /// and fetched for `user_id`.
    pub fn is_fresh(&self, now: DateTime<Utc>, expiry: Duration, user_id: &str) -> bool {
        !self.invalidated
            && self.age_at(now) < expiry
            && self.owner.as_deref() == Some(user_id)
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn age_display(&self) -> String {
        Self::format_age(self.age_minutes())
    }

    fn format_age(minutes: i64) -> String {
        if minutes < 1 {
            // Also covers clock skew (negative ages)
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                // Round up: 1h 30m+ becomes 2h
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}
