//! Display formatting helpers.

pub mod format;

pub use format::{format_date, format_duration, format_optional, format_percent, truncate_string};
