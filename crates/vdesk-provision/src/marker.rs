use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use vdesk_core::{current_unix_timestamp_ms, write_text_atomic};

pub const INSTALL_MARKER_FILE_NAME: &str = ".vdesk-install.json";
pub const INSTALL_MARKER_SCHEMA_VERSION: u32 = 1;

fn install_marker_schema_version() -> u32 {
    INSTALL_MARKER_SCHEMA_VERSION
}

/// How an instance directory came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallSource {
    Installer,
    Clone,
}

impl InstallSource {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallSource::Installer => "installer",
            InstallSource::Clone => "clone",
        }
    }
}

/// Non-authoritative record written into each instance directory after a
/// successful install or clone. Presence probing stays the decision input;
/// the marker only lets later runs report what was installed and when, so
/// upgrades become detectable instead of invisible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallMarker {
    #[serde(default = "install_marker_schema_version")]
    pub schema_version: u32,
    pub family_key: String,
    pub instance_index: u32,
    pub source: InstallSource,
    #[serde(default)]
    pub installer_artifact: Option<String>,
    #[serde(default)]
    pub installer_sha256: Option<String>,
    #[serde(default)]
    pub cloned_from: Option<String>,
    pub installed_unix_ms: u64,
}

impl InstallMarker {
    pub fn from_installer(
        family_key: &str,
        instance_index: u32,
        installer_artifact: &str,
        installer_sha256: Option<&str>,
    ) -> Self {
        Self {
            schema_version: INSTALL_MARKER_SCHEMA_VERSION,
            family_key: family_key.to_string(),
            instance_index,
            source: InstallSource::Installer,
            installer_artifact: Some(installer_artifact.to_string()),
            installer_sha256: installer_sha256.map(str::to_string),
            cloned_from: None,
            installed_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn from_clone(family_key: &str, instance_index: u32, clone_source: &Path) -> Self {
        Self {
            schema_version: INSTALL_MARKER_SCHEMA_VERSION,
            family_key: family_key.to_string(),
            instance_index,
            source: InstallSource::Clone,
            installer_artifact: None,
            installer_sha256: None,
            cloned_from: Some(clone_source.display().to_string()),
            installed_unix_ms: current_unix_timestamp_ms(),
        }
    }
}

pub fn write_install_marker(instance_dir: &Path, marker: &InstallMarker) -> Result<()> {
    let path = instance_dir.join(INSTALL_MARKER_FILE_NAME);
    let mut encoded =
        serde_json::to_string_pretty(marker).context("failed to encode install marker")?;
    encoded.push('\n');
    write_text_atomic(&path, &encoded)
        .with_context(|| format!("failed to write install marker {}", path.display()))
}

pub fn load_install_marker(instance_dir: &Path) -> Result<Option<InstallMarker>> {
    let path = instance_dir.join(INSTALL_MARKER_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read install marker {}", path.display()))?;
    let marker = serde_json::from_str::<InstallMarker>(&raw)
        .with_context(|| format!("failed to parse install marker {}", path.display()))?;
    if marker.schema_version != INSTALL_MARKER_SCHEMA_VERSION {
        bail!(
            "unsupported install marker schema_version {} in {} (expected {})",
            marker.schema_version,
            path.display(),
            INSTALL_MARKER_SCHEMA_VERSION
        );
    }
    Ok(Some(marker))
}
