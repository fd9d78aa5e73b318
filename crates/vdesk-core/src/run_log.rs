use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::time_utils::display_timestamp;

pub const RUN_LOG_FILE_NAME: &str = "vdesk-provision.log";

/// Append-only line log: one `[YYYY-MM-DD HH:MM:SS] message` entry per line.
///
/// Opened once at run start and passed by reference into every component in
/// place of any ambient logging global. The file is never rotated or
/// truncated by vdesk; operators tail it across runs.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    echo_stdout: bool,
}

impl RunLog {
    /// Opens (creating if needed) the log at `path`. With `echo_stdout` set,
    /// every line is mirrored to standard output for interactive runs.
    pub fn open(path: impl Into<PathBuf>, echo_stdout: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open run log {}", path.display()))?;
        Ok(Self { path, echo_stdout })
    }

    /// Default log location under the system temp directory.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(RUN_LOG_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped line. Logging is best-effort: an append
    /// failure is reported through tracing and never fails the caller.
    pub fn line(&self, message: &str) {
        let entry = format!("[{}] {message}", display_timestamp());
        if self.echo_stdout {
            println!("{entry}");
        }
        if let Err(error) = self.append_entry(&entry) {
            tracing::warn!(
                path = %self.path.display(),
                error = %error,
                "run log append failed"
            );
        }
    }

    fn append_entry(&self, entry: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{entry}")
            .with_context(|| format!("failed to append {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}
