use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};

/// File name of the desktop helper searched for next to the vdesk binary
/// when no explicit path is configured.
pub const DEFAULT_DESKTOP_HELPER: &str = "vdesk-desktop-helper.exe";

/// Creates and activates virtual desktops. Injected so the launch sequence
/// is testable without a compositor on the host.
pub trait DesktopCompositor: Send + Sync {
    /// Creates the named desktop when it does not already exist.
    fn ensure_desktop(&self, name: &str) -> Result<()>;
    /// Makes the named desktop the active one.
    fn switch_desktop(&self, name: &str) -> Result<()>;
    /// Names of the desktops that currently exist.
    fn list_desktops(&self) -> Result<Vec<String>>;
}

/// Production compositor: shells out to the bundled desktop helper, which
/// wraps the platform's virtual-desktop API behind a `create`, `switch` and
/// `list` command surface.
#[derive(Debug, Clone)]
pub struct HelperBinaryCompositor {
    pub helper_path: PathBuf,
}

impl HelperBinaryCompositor {
    pub fn new(helper_path: PathBuf) -> Self {
        Self { helper_path }
    }

    /// Helper path resolved relative to the running executable, falling back
    /// to the bare helper name so PATH lookup still applies.
    pub fn beside_current_exe() -> Self {
        let helper_path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_DESKTOP_HELPER)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DESKTOP_HELPER));
        Self::new(helper_path)
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = std::process::Command::new(&self.helper_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| {
                format!(
                    "failed to start desktop helper '{}'",
                    self.helper_path.display()
                )
            })?;
        if !output.status.success() {
            bail!(
                "desktop helper '{}' {} exited with {}: {}",
                self.helper_path.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DesktopCompositor for HelperBinaryCompositor {
    fn ensure_desktop(&self, name: &str) -> Result<()> {
        self.run(&["create", name]).map(|_| ())
    }

    fn switch_desktop(&self, name: &str) -> Result<()> {
        self.run(&["switch", name]).map(|_| ())
    }

    fn list_desktops(&self) -> Result<Vec<String>> {
        let stdout = self.run(&["list"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
