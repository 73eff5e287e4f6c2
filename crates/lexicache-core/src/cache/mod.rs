//! Cache building blocks.
//!
//! - `CachedData`: a value plus its fetch time, owner and invalidation flag,
//!   used for the in-memory progress entries
//! - `CacheKey`, `EntryState`: entry identity and its Empty/Loading/Fresh/Stale state
//! - `KeyValueStore`: the local persistent mirror for scalar values such as
//!   the last known coin balance. `FileStore` keeps one JSON file per key in
//!   the cache directory; `MemoryStore` keeps them in memory.

pub mod entry;
pub mod key;
pub mod kv;

pub use entry::CachedData;
pub use key::{CacheKey, EntryState};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
