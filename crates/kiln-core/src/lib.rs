//! Foundational low-level utilities shared across Kiln crates.
//!
//! Provides atomic file-write helpers, timestamp helpers, and the path
//! sanitizers used by conversation stores and file-write sinks.

pub mod atomic_io;
pub mod path_sanitize;
pub mod time_utils;

pub use atomic_io::{write_text_atomic, write_text_atomic_async};
pub use path_sanitize::{sanitize_relative_path, store_file_stem_for_key};
pub use time_utils::{current_rfc3339_timestamp, current_unix_timestamp, current_unix_timestamp_ms};
