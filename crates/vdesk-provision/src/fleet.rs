use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const FLEET_CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_MAX_INSTANCES: u32 = 10;

fn fleet_config_schema_version() -> u32 {
    FLEET_CONFIG_SCHEMA_VERSION
}

fn default_max_instances() -> u32 {
    DEFAULT_MAX_INSTANCES
}

/// One application family being provisioned: its installer artifact, disk
/// layout, and launch flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FamilyConfig {
    pub key: String,
    pub display_name: String,
    /// Name of this family's entry in the manifest `applications` map.
    pub installer_artifact: String,
    pub base_install_dir: PathBuf,
    pub executable_relative: PathBuf,
    /// Arguments for fire-and-forget launches; carries the
    /// standalone/portable mode flag.
    #[serde(default)]
    pub launch_args: Vec<String>,
    pub plugin_subdir: PathBuf,
    pub config_bundle_relative: PathBuf,
    /// Fallback silent-install arguments used when the manifest entry does
    /// not carry its own.
    #[serde(default)]
    pub default_install_args: Vec<String>,
}

impl FamilyConfig {
    /// Deterministic install path for an instance slot: index 1 owns the
    /// family's base path, every higher index appends ` <index>` to the
    /// directory name. The provisioner and the launch sequencer both derive
    /// paths through here and must never diverge.
    pub fn instance_dir(&self, index: u32) -> PathBuf {
        if index <= 1 {
            return self.base_install_dir.clone();
        }
        let mut name = self
            .base_install_dir
            .file_name()
            .map(|value| value.to_os_string())
            .unwrap_or_default();
        name.push(format!(" {index}"));
        match self.base_install_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
            _ => PathBuf::from(name),
        }
    }

    pub fn executable_path(&self, index: u32) -> PathBuf {
        self.instance_dir(index).join(&self.executable_relative)
    }

    pub fn plugin_dir(&self, index: u32) -> PathBuf {
        self.instance_dir(index).join(&self.plugin_subdir)
    }

    pub fn config_bundle_path(&self, index: u32) -> PathBuf {
        self.instance_dir(index).join(&self.config_bundle_relative)
    }
}

/// The provisioning fleet: which families exist, where user profiles live,
/// and how many instance slots a run may address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetConfig {
    #[serde(default = "fleet_config_schema_version")]
    pub schema_version: u32,
    pub families: Vec<FamilyConfig>,
    /// Directory whose immediate subdirectories are user profiles.
    pub profiles_root: PathBuf,
    /// Plugin directory relative to each discovered profile.
    pub profile_plugin_subdir: PathBuf,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

impl FleetConfig {
    /// Built-in fleet describing the two terminal families on a standard
    /// Windows host. Operators override it with `--fleet-config`.
    pub fn builtin_default() -> Self {
        Self {
            schema_version: FLEET_CONFIG_SCHEMA_VERSION,
            families: vec![
                FamilyConfig {
                    key: "terminal-a".to_string(),
                    display_name: "Terminal A".to_string(),
                    installer_artifact: "terminal-a-setup".to_string(),
                    base_install_dir: PathBuf::from(r"C:\Program Files\Terminal A"),
                    executable_relative: PathBuf::from("terminal.exe"),
                    launch_args: vec!["/portable".to_string()],
                    plugin_subdir: PathBuf::from("experts"),
                    config_bundle_relative: PathBuf::from("config").join("instance.ini"),
                    default_install_args: vec!["/auto".to_string()],
                },
                FamilyConfig {
                    key: "terminal-b".to_string(),
                    display_name: "Terminal B".to_string(),
                    installer_artifact: "terminal-b-setup".to_string(),
                    base_install_dir: PathBuf::from(r"C:\Program Files\Terminal B"),
                    executable_relative: PathBuf::from("terminal.exe"),
                    launch_args: vec!["/portable".to_string()],
                    plugin_subdir: PathBuf::from("experts"),
                    config_bundle_relative: PathBuf::from("config").join("instance.ini"),
                    default_install_args: vec!["/auto".to_string()],
                },
            ],
            profiles_root: PathBuf::from(r"C:\Users"),
            profile_plugin_subdir: PathBuf::from("AppData")
                .join("Roaming")
                .join("Terminal")
                .join("Experts"),
            max_instances: DEFAULT_MAX_INSTANCES,
        }
    }

    pub fn family(&self, key: &str) -> Option<&FamilyConfig> {
        self.families.iter().find(|family| family.key == key)
    }
}

pub fn validate_fleet_config(config: &FleetConfig) -> Result<()> {
    if config.schema_version != FLEET_CONFIG_SCHEMA_VERSION {
        bail!(
            "unsupported fleet config schema_version {} (expected {})",
            config.schema_version,
            FLEET_CONFIG_SCHEMA_VERSION
        );
    }
    if config.families.is_empty() {
        bail!("fleet config must declare at least one family");
    }
    if config.max_instances == 0 {
        bail!("fleet config max_instances must be greater than 0");
    }
    let mut seen = BTreeSet::new();
    for family in &config.families {
        if family.key.trim().is_empty() {
            bail!("fleet config family key cannot be empty");
        }
        if !seen.insert(family.key.as_str()) {
            bail!("fleet config family key '{}' is duplicated", family.key);
        }
        if family.installer_artifact.trim().is_empty() {
            bail!(
                "fleet config family '{}' installer_artifact cannot be empty",
                family.key
            );
        }
        for (label, path) in [
            ("base_install_dir", family.base_install_dir.as_path()),
            ("executable_relative", family.executable_relative.as_path()),
            ("plugin_subdir", family.plugin_subdir.as_path()),
            (
                "config_bundle_relative",
                family.config_bundle_relative.as_path(),
            ),
        ] {
            if path.as_os_str().is_empty() {
                bail!("fleet config family '{}' {label} cannot be empty", family.key);
            }
        }
    }
    if config.profiles_root.as_os_str().is_empty() {
        bail!("fleet config profiles_root cannot be empty");
    }
    if config.profile_plugin_subdir.as_os_str().is_empty() {
        bail!("fleet config profile_plugin_subdir cannot be empty");
    }
    Ok(())
}

/// Loads and validates a fleet config override file.
pub fn load_fleet_config(path: &Path) -> Result<FleetConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fleet config {}", path.display()))?;
    let config = serde_json::from_str::<FleetConfig>(&raw)
        .with_context(|| format!("failed to parse fleet config {}", path.display()))?;
    validate_fleet_config(&config)
        .with_context(|| format!("fleet config {} is invalid", path.display()))?;
    Ok(config)
}
