//! Foundational low-level utilities shared across vdesk crates.
//!
//! Provides atomic file-write helpers, time utilities, SHA-256 content
//! hashing, recursive tree copying, and the line-oriented run log that every
//! provisioning component writes through.

pub mod atomic_io;
pub mod content_hash;
pub mod fs_tree;
pub mod run_log;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use content_hash::{is_valid_sha256_hex, sha256_file_hex, sha256_hex, sha256_matches};
pub use fs_tree::{copy_tree_overwrite, CopyTreeStats};
pub use run_log::RunLog;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, display_timestamp};
