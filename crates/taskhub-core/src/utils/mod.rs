//! Utility functions for string and timestamp formatting.

pub mod format;

pub use format::{format_optional, format_timestamp, parse_timestamp, truncate_string};
