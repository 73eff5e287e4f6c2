//! Network fetch coordination: request deduplication, debouncing and timeouts.

pub mod fetch;

pub use fetch::{FetchCoordinator, FetchResult, Fetched};
