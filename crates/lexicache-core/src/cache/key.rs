use std::fmt;

/// Identifies one cached progress entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The learner's full progress collection
    Global,
    /// A single exercise's record
    Exercise(String),
}

impl CacheKey {
    pub fn exercise(exercise_id: impl Into<String>) -> Self {
        CacheKey::Exercise(exercise_id.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Global => write!(f, "global"),
            CacheKey::Exercise(id) => write!(f, "exercise:{}", id),
        }
    }
}

/// Lifecycle of a cache entry as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Nothing cached and nothing in flight
    Empty,
    /// A fetch is in flight
    Loading,
    /// Cached and servable without a refetch
    Fresh,
    /// Cached but expired, invalidated, or owned by another user
    Stale,
}
