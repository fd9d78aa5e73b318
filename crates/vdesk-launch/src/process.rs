use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};

/// Starts terminal processes without waiting on them. Injected so the launch
/// sequence is testable without real binaries.
pub trait ProcessLauncher: Send + Sync {
    /// Spawns the executable fire-and-forget and returns its process id. The
    /// child is never waited on; terminals outlive the provisioning run.
    fn spawn_detached(
        &self,
        executable: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> Result<u32>;
}

/// Production launcher backed by `std::process` with all stdio detached.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessLauncher;

impl ProcessLauncher for SystemProcessLauncher {
    fn spawn_detached(
        &self,
        executable: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> Result<u32> {
        let child = std::process::Command::new(executable)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start '{}'", executable.display()))?;
        Ok(child.id())
    }
}
