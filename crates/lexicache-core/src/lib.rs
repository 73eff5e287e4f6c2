//! Lexicache core - progress cache and reconciliation engine.
//!
//! This crate keeps a language learner's exercise progress and coin balance
//! in sync with a remote REST backend:
//!
//! - `store::ProgressStore`: cached progress with a freshness policy,
//!   request deduplication and server-confirmed progress updates
//! - `store::CoinStore`: optimistic coin balance mutations with rollback
//! - `api::ApiClient`: the HTTP client implementing `api::ProgressService`
//! - `auth`, `cache`, `config`: sessions, local key-value mirror, settings

pub mod api;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod utils;

pub use error::StoreError;
