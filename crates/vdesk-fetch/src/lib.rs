//! Verified artifact downloads with bounded retries for vdesk.
//!
//! Every remote artifact (installer, plugin binary, config bundle) comes
//! through [`fetch`]: bounded attempts with a linearly increasing backoff,
//! truncate-overwrite writes so a failed attempt never leaves appended
//! garbage, and optional SHA-256 verification that deletes a mismatched file
//! before the next attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use thiserror::Error;

use vdesk_core::{sha256_file_hex, sha256_matches};

pub const DEFAULT_FETCH_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_FETCH_BASE_DELAY_MS: u64 = 1_000;
pub const FETCH_USER_AGENT: &str = "vdesk/artifact-fetch";

/// Retry knobs for [`fetch`]. `max_attempts` counts every transfer attempt,
/// including the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_FETCH_BASE_DELAY_MS,
        }
    }
}

/// Outcome of a successful [`fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub url: String,
    pub destination: PathBuf,
    pub attempts: usize,
    pub bytes_written: u64,
    pub verified: bool,
}

/// Error returned when an artifact cannot be brought to disk.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch options must allow at least one attempt")]
    NoAttemptsAllowed,
    #[error("failed to prepare destination '{path}': {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch of '{url}' failed after {attempts} attempts: {last_error}")]
    AttemptsExhausted {
        url: String,
        attempts: usize,
        last_error: String,
    },
}

/// Linear backoff: the pause after failed attempt `attempt` (1-based) is
/// `base_delay_ms * attempt`.
pub fn fetch_retry_delay_ms(base_delay_ms: u64, attempt: usize) -> u64 {
    base_delay_ms.saturating_mul(attempt.min(u32::MAX as usize) as u64)
}

/// Downloads `url` into `destination`, retrying up to
/// `options.max_attempts` times. When `expected_sha256` is supplied the
/// destination is hashed after every transfer and a mismatch deletes the
/// file and counts as a failed attempt. Exhausting the attempt budget
/// returns [`FetchError::AttemptsExhausted`]; the caller decides whether
/// that is fatal for the run or only for one artifact.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
    expected_sha256: Option<&str>,
    options: &FetchOptions,
) -> Result<FetchReport, FetchError> {
    if options.max_attempts == 0 {
        return Err(FetchError::NoAttemptsAllowed);
    }
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| FetchError::Destination {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut last_error = String::new();
    for attempt in 1..=options.max_attempts {
        match transfer_once(client, url, destination, expected_sha256).await {
            Ok(bytes_written) => {
                return Ok(FetchReport {
                    url: url.to_string(),
                    destination: destination.to_path_buf(),
                    attempts: attempt,
                    bytes_written,
                    verified: expected_sha256.is_some(),
                });
            }
            Err(error) => {
                last_error = format!("{error:#}");
                tracing::warn!(
                    url,
                    attempt,
                    max_attempts = options.max_attempts,
                    error = %last_error,
                    "artifact fetch attempt failed"
                );
                if attempt < options.max_attempts {
                    let delay_ms = fetch_retry_delay_ms(options.base_delay_ms, attempt);
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }
    }

    Err(FetchError::AttemptsExhausted {
        url: url.to_string(),
        attempts: options.max_attempts,
        last_error,
    })
}

async fn transfer_once(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
    expected_sha256: Option<&str>,
) -> Result<u64> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, FETCH_USER_AGENT)
        .send()
        .await
        .with_context(|| format!("request to '{url}' failed"))?;
    if !response.status().is_success() {
        bail!("request to '{url}' returned status {}", response.status());
    }
    let body = response
        .bytes()
        .await
        .with_context(|| format!("failed to read response body from '{url}'"))?;

    // Plain truncating write: a failed earlier attempt may have left a
    // partial file behind and the next attempt must replace it wholesale.
    std::fs::write(destination, &body)
        .with_context(|| format!("failed to write {}", destination.display()))?;

    if let Some(expected) = expected_sha256 {
        let actual = sha256_file_hex(destination)?;
        if !sha256_matches(expected, &actual) {
            let _ = std::fs::remove_file(destination);
            bail!(
                "checksum mismatch for '{url}': expected {expected}, computed {actual}; file deleted"
            );
        }
    }

    Ok(body.len() as u64)
}
