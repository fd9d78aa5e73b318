use std::process::Stdio;

use anyhow::{Context, Result};
use thiserror::Error;

/// Error returned when the run cannot start on this console session.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("administrative rights are required; re-run vdesk from an elevated shell")]
    NotElevated,
    #[error("elevation probe failed: {0}")]
    Probe(String),
}

/// Answers whether the process holds administrative rights. Injected so the
/// gate is testable without changing the test runner's privileges.
pub trait ElevationProbe: Send + Sync {
    fn is_elevated(&self) -> Result<bool>;
}

/// Production probe. On Windows `net session` succeeds only in elevated
/// shells; elsewhere the install paths are operator-chosen and no elevation
/// concept applies, so the probe reports elevated.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemElevationProbe;

impl ElevationProbe for SystemElevationProbe {
    fn is_elevated(&self) -> Result<bool> {
        if !cfg!(windows) {
            return Ok(true);
        }
        let status = std::process::Command::new("net")
            .arg("session")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to run the elevation probe")?;
        Ok(status.success())
    }
}

/// Installs write to machine-wide locations, so the whole run is refused
/// up front without rights rather than failing halfway through.
pub fn require_elevation(probe: &dyn ElevationProbe) -> Result<(), PreflightError> {
    match probe.is_elevated() {
        Ok(true) => Ok(()),
        Ok(false) => Err(PreflightError::NotElevated),
        Err(error) => Err(PreflightError::Probe(format!("{error:#}"))),
    }
}
