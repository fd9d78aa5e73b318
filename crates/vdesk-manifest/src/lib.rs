//! Run-manifest model and resolver for vdesk.
//!
//! The manifest is a remote JSON document naming every fetchable artifact of
//! a provisioning run: OS prerequisites, the per-family terminal installers,
//! the plugin set, and optional per-instance config bundles, each with its
//! expected SHA-256. It is fetched once per run and treated as a read-only
//! snapshot; a resolve failure is always fatal because no artifact URL or
//! hash is known without it.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use vdesk_core::is_valid_sha256_hex;

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;
pub const MANIFEST_FETCH_TIMEOUT_MS: u64 = 15_000;
pub const MANIFEST_USER_AGENT: &str = "vdesk/manifest-resolver";

fn manifest_schema_version() -> u32 {
    MANIFEST_SCHEMA_VERSION
}

fn default_plugin_file_name(name: &str) -> String {
    format!("{name}.dll")
}

/// A fetchable, verifiable unit resolved from the manifest. Immutable for
/// the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub url: String,
    pub sha256: Option<String>,
    pub install_args: Vec<String>,
}

/// A plugin artifact with its distribution file name. The same plugin set
/// must eventually be present in every destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginArtifact {
    pub name: String,
    pub version: String,
    pub file_name: String,
    pub url: String,
    pub sha256: String,
}

/// Manifest entry for a prerequisite or application installer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestInstallerEntry {
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub install_args: Vec<String>,
}

/// Manifest entry for one plugin binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestPluginEntry {
    pub version: String,
    pub sha256: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Manifest entry for a per-instance configuration bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestConfigBundleEntry {
    pub sha256: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// The run manifest document. Unknown JSON fields are tolerated so newer
/// manifests keep working against older binaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default = "manifest_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub prerequisites: BTreeMap<String, ManifestInstallerEntry>,
    #[serde(default)]
    pub applications: BTreeMap<String, ManifestInstallerEntry>,
    #[serde(default)]
    pub plugins: BTreeMap<String, ManifestPluginEntry>,
    #[serde(default)]
    pub config_bundles: BTreeMap<String, ManifestConfigBundleEntry>,
}

impl Manifest {
    /// Descriptors for the OS prerequisites, in stable name order.
    pub fn prerequisite_descriptors(&self) -> Vec<ArtifactDescriptor> {
        self.prerequisites
            .iter()
            .map(|(name, entry)| installer_descriptor(name, entry))
            .collect()
    }

    /// Installer descriptor for one application family. Every configured
    /// family must have an entry; a missing one is a fatal run error.
    pub fn application_descriptor(&self, installer_artifact: &str) -> Result<ArtifactDescriptor> {
        let entry = self.applications.get(installer_artifact).with_context(|| {
            format!("manifest has no application entry named '{installer_artifact}'")
        })?;
        Ok(installer_descriptor(installer_artifact, entry))
    }

    /// The plugin set, in stable name order, with download URLs derived
    /// from `base_url` when an entry does not carry its own.
    pub fn plugin_artifacts(&self) -> Result<Vec<PluginArtifact>> {
        let mut artifacts = Vec::with_capacity(self.plugins.len());
        for (name, entry) in &self.plugins {
            let file_name = entry
                .file
                .clone()
                .unwrap_or_else(|| default_plugin_file_name(name));
            let url = match &entry.url {
                Some(url) => url.clone(),
                None => format!(
                    "{}/plugins/{name}/{}/{file_name}",
                    self.require_base_url()?,
                    entry.version
                ),
            };
            artifacts.push(PluginArtifact {
                name: name.clone(),
                version: entry.version.clone(),
                file_name,
                url,
                sha256: entry.sha256.clone(),
            });
        }
        Ok(artifacts)
    }

    /// Config bundle for one instance index, when the manifest carries one.
    pub fn config_bundle_descriptor(&self, index: u32) -> Result<Option<ArtifactDescriptor>> {
        let Some(entry) = self.config_bundles.get(&index.to_string()) else {
            return Ok(None);
        };
        let url = match &entry.url {
            Some(url) => url.clone(),
            None => format!("{}/config/instance-{index}.ini", self.require_base_url()?),
        };
        Ok(Some(ArtifactDescriptor {
            name: format!("config-bundle-{index}"),
            url,
            sha256: Some(entry.sha256.clone()),
            install_args: Vec::new(),
        }))
    }

    fn require_base_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .context("manifest base_url is required to derive artifact URLs")
    }
}

fn installer_descriptor(name: &str, entry: &ManifestInstallerEntry) -> ArtifactDescriptor {
    ArtifactDescriptor {
        name: name.to_string(),
        url: entry.url.clone(),
        sha256: entry.sha256.clone(),
        install_args: entry.install_args.clone(),
    }
}

/// Parses and validates a manifest document.
pub fn parse_manifest(raw: &str) -> Result<Manifest> {
    let manifest =
        serde_json::from_str::<Manifest>(raw).context("failed to parse run manifest")?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

pub fn validate_manifest(manifest: &Manifest) -> Result<()> {
    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        bail!(
            "unsupported manifest schema_version {} (expected {})",
            manifest.schema_version,
            MANIFEST_SCHEMA_VERSION
        );
    }
    for (role, entries) in [
        ("prerequisite", &manifest.prerequisites),
        ("application", &manifest.applications),
    ] {
        for (name, entry) in entries {
            if name.trim().is_empty() {
                bail!("manifest {role} entries cannot have empty names");
            }
            if entry.url.trim().is_empty() {
                bail!("manifest {role} '{name}' has an empty url");
            }
            if let Some(sha256) = &entry.sha256 {
                if !is_valid_sha256_hex(sha256) {
                    bail!("manifest {role} '{name}' sha256 must be a 64-char hex string");
                }
            }
        }
    }
    for (name, entry) in &manifest.plugins {
        if name.trim().is_empty() {
            bail!("manifest plugin entries cannot have empty names");
        }
        if entry.version.trim().is_empty() {
            bail!("manifest plugin '{name}' has an empty version");
        }
        if let Some(file) = &entry.file {
            if file.trim().is_empty() {
                bail!("manifest plugin '{name}' has an empty file name");
            }
        }
        if !is_valid_sha256_hex(&entry.sha256) {
            bail!("manifest plugin '{name}' sha256 must be a 64-char hex string");
        }
        match &entry.url {
            Some(url) if url.trim().is_empty() => {
                bail!("manifest plugin '{name}' has an empty url");
            }
            Some(_) => {}
            None => {
                manifest.require_base_url().with_context(|| {
                    format!("manifest plugin '{name}' has no url and no base_url to derive one")
                })?;
            }
        }
    }
    for (key, entry) in &manifest.config_bundles {
        let index = key.parse::<u32>().ok().filter(|index| *index > 0);
        // Keys must be canonical decimal: "01" would parse but never match a
        // descriptor lookup for instance 1.
        if !index.is_some_and(|index| index.to_string() == *key) {
            bail!("manifest config_bundles key '{key}' is not a positive instance index");
        }
        if !is_valid_sha256_hex(&entry.sha256) {
            bail!("manifest config bundle '{key}' sha256 must be a 64-char hex string");
        }
        match &entry.url {
            Some(url) if url.trim().is_empty() => {
                bail!("manifest config bundle '{key}' has an empty url");
            }
            Some(_) => {}
            None => {
                manifest.require_base_url().with_context(|| {
                    format!("manifest config bundle '{key}' has no url and no base_url to derive one")
                })?;
            }
        }
    }
    Ok(())
}

/// Fetches the manifest with a single GET and parses it. No retry wrapper of
/// its own: a failure here aborts the run, so the caller escalates rather
/// than degrades.
pub async fn resolve_manifest(client: &reqwest::Client, manifest_url: &str) -> Result<Manifest> {
    let response = client
        .get(manifest_url)
        .timeout(Duration::from_millis(MANIFEST_FETCH_TIMEOUT_MS))
        .header(reqwest::header::USER_AGENT, MANIFEST_USER_AGENT)
        .send()
        .await
        .with_context(|| format!("failed to fetch manifest from '{manifest_url}'"))?;
    if !response.status().is_success() {
        bail!(
            "manifest request to '{manifest_url}' returned status {}",
            response.status()
        );
    }
    let raw = response
        .text()
        .await
        .with_context(|| format!("failed to read manifest body from '{manifest_url}'"))?;
    parse_manifest(&raw).with_context(|| format!("manifest from '{manifest_url}' is invalid"))
}
