//! REST API client module for the learning backend.
//!
//! This module provides the `ProgressService` trait the stores are written
//! against, and `ApiClient`, its `reqwest` implementation.
//!
//! The API uses bearer token authentication and wraps every payload in a
//! `{success, message?, ...}` envelope, decoded by `Envelope`.

pub mod client;
pub mod envelope;
pub mod error;
pub mod service;

pub use client::ApiClient;
pub use envelope::Envelope;
pub use error::ApiError;
pub use service::ProgressService;
