use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;

pub fn current_unix_timestamp() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    }
}

pub fn current_unix_timestamp_ms() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(u64::MAX as u128) as u64,
        Err(_) => 0,
    }
}

/// Local wall-clock stamp used in run-log lines: `YYYY-MM-DD HH:MM:SS`.
pub fn display_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
