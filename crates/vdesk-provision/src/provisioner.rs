use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use thiserror::Error;

use vdesk_core::{copy_tree_overwrite, RunLog};
use vdesk_fetch::{fetch, FetchError, FetchOptions};
use vdesk_manifest::{ArtifactDescriptor, Manifest};

use crate::fleet::{FamilyConfig, FleetConfig};
use crate::marker::{load_install_marker, write_install_marker, InstallMarker};

/// Runs an external installer to completion. Injected so provisioning logic
/// is testable without executing real vendor binaries.
pub trait InstallerRunner: Send + Sync {
    /// Blocks until the installer exits and returns its exit code, when the
    /// platform reports one.
    fn run_to_exit(&self, program: &Path, args: &[String]) -> Result<Option<i32>>;
}

/// Production runner: spawns the staged installer with its output discarded
/// and waits for it to finish.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInstallerRunner;

impl InstallerRunner for SystemInstallerRunner {
    fn run_to_exit(&self, program: &Path, args: &[String]) -> Result<Option<i32>> {
        let status = std::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to start installer {}", program.display()))?;
        Ok(status.code())
    }
}

/// Enumerates supported `ProvisionOutcome` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Installed,
    AlreadyPresent,
    ClonedFrom(u32),
}

impl ProvisionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionOutcome::Installed => "installed",
            ProvisionOutcome::AlreadyPresent => "already_present",
            ProvisionOutcome::ClonedFrom(_) => "cloned",
        }
    }
}

/// Error returned when a slot cannot be brought to its installed state. All
/// of these are fatal for the affected slot; `provision_all` records them and
/// keeps going so other slots still converge.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("instance index {index} is invalid; indices start at 1")]
    InvalidIndex { index: u32 },
    #[error(
        "clone source '{source_dir}' for family '{family}' instance {index} is missing; \
         lower indices must provision first"
    )]
    MissingCloneSource {
        family: String,
        index: u32,
        source_dir: PathBuf,
    },
    #[error("failed to fetch installer for family '{family}': {source}")]
    InstallerFetch {
        family: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to run installer '{program}' for family '{family}': {message}")]
    InstallerRun {
        family: String,
        program: PathBuf,
        message: String,
    },
    #[error("installer for family '{family}' finished but target '{target}' does not exist")]
    InstallerDidNotProduceTarget { family: String, target: PathBuf },
    #[error("failed to clone family '{family}' instance {index} from '{source_dir}': {message}")]
    CloneFailed {
        family: String,
        index: u32,
        source_dir: PathBuf,
        message: String,
    },
}

/// Enumerates supported `SlotStatus` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Installed,
    AlreadyPresent,
    Cloned,
    Failed,
    SkippedAfterFailure,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Installed => "installed",
            SlotStatus::AlreadyPresent => "already_present",
            SlotStatus::Cloned => "cloned",
            SlotStatus::Failed => "failed",
            SlotStatus::SkippedAfterFailure => "skipped_after_failure",
        }
    }

    /// A healthy slot's directories may receive plugin distribution.
    pub fn is_healthy(self) -> bool {
        matches!(
            self,
            SlotStatus::Installed | SlotStatus::AlreadyPresent | SlotStatus::Cloned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub family_key: String,
    pub index: u32,
    pub target_dir: PathBuf,
    pub status: SlotStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionRunReport {
    pub slots: Vec<SlotReport>,
    pub installed: usize,
    pub already_present: usize,
    pub cloned: usize,
    pub failed: usize,
    pub skipped_after_failure: usize,
    pub config_bundles_applied: usize,
    pub config_bundle_failures: usize,
}

impl ProvisionRunReport {
    fn record(&mut self, slot: SlotReport) {
        match slot.status {
            SlotStatus::Installed => self.installed += 1,
            SlotStatus::AlreadyPresent => self.already_present += 1,
            SlotStatus::Cloned => self.cloned += 1,
            SlotStatus::Failed => self.failed += 1,
            SlotStatus::SkippedAfterFailure => self.skipped_after_failure += 1,
        }
        self.slots.push(slot);
    }

    /// Slots that must not be treated as plugin destinations this run.
    pub fn fatal_slots(&self) -> BTreeSet<(String, u32)> {
        self.slots
            .iter()
            .filter(|slot| !slot.status.is_healthy())
            .map(|slot| (slot.family_key.clone(), slot.index))
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.skipped_after_failure > 0
    }
}

pub fn render_provision_report(report: &ProvisionRunReport) -> String {
    format!(
        "provisioning summary: slots={} installed={} already_present={} cloned={} failed={} skipped_after_failure={} config_bundles_applied={} config_bundle_failures={}",
        report.slots.len(),
        report.installed,
        report.already_present,
        report.cloned,
        report.failed,
        report.skipped_after_failure,
        report.config_bundles_applied,
        report.config_bundle_failures,
    )
}

/// The idempotent per-slot provisioning engine: decides install vs. clone
/// vs. no-op by probing the filesystem fresh on every call.
pub struct ProvisionEngine<'a> {
    pub client: &'a reqwest::Client,
    pub fetch_options: FetchOptions,
    pub staging_dir: PathBuf,
    pub installer_runner: &'a dyn InstallerRunner,
    pub run_log: &'a RunLog,
}

impl ProvisionEngine<'_> {
    /// Brings one (family, index) slot to the installed state.
    ///
    /// An existing target directory short-circuits to `AlreadyPresent`
    /// without touching the filesystem. Index 1 installs via the family's
    /// installer and verifies the target exists afterwards because installer
    /// exit codes are not trusted. Higher indices clone the previous
    /// index's directory, which must already exist.
    pub async fn provision_instance(
        &self,
        family: &FamilyConfig,
        index: u32,
        installer: &ArtifactDescriptor,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        if index == 0 {
            return Err(ProvisionError::InvalidIndex { index });
        }
        let target = family.instance_dir(index);
        if target.is_dir() {
            match load_install_marker(&target) {
                Ok(Some(marker)) => self.run_log.line(&format!(
                    "{} instance {index} already present at '{}' (source={})",
                    family.display_name,
                    target.display(),
                    marker.source.as_str()
                )),
                Ok(None) => self.run_log.line(&format!(
                    "{} instance {index} already present at '{}' (no install marker)",
                    family.display_name,
                    target.display()
                )),
                Err(error) => tracing::debug!(
                    family = %family.key,
                    index,
                    error = %error,
                    "install marker unreadable; treating directory as installed"
                ),
            }
            return Ok(ProvisionOutcome::AlreadyPresent);
        }
        if index == 1 {
            self.install_first_instance(family, &target, installer).await
        } else {
            self.clone_from_previous(family, index, &target)
        }
    }

    async fn install_first_instance(
        &self,
        family: &FamilyConfig,
        target: &Path,
        installer: &ArtifactDescriptor,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let staged = self
            .staging_dir
            .join("installers")
            .join(artifact_file_name(installer));
        self.run_log.line(&format!(
            "fetching installer '{}' for {}",
            installer.name, family.display_name
        ));
        let fetched = fetch(
            self.client,
            &installer.url,
            &staged,
            installer.sha256.as_deref(),
            &self.fetch_options,
        )
        .await
        .map_err(|source| ProvisionError::InstallerFetch {
            family: family.key.clone(),
            source,
        })?;
        self.run_log.line(&format!(
            "staged installer '{}' ({} bytes, verified={}, attempts={})",
            installer.name, fetched.bytes_written, fetched.verified, fetched.attempts
        ));

        let args = if installer.install_args.is_empty() {
            family.default_install_args.as_slice()
        } else {
            installer.install_args.as_slice()
        };
        self.run_log.line(&format!(
            "running installer for {} unattended",
            family.display_name
        ));
        let exit_code = self
            .installer_runner
            .run_to_exit(&staged, args)
            .map_err(|error| ProvisionError::InstallerRun {
                family: family.key.clone(),
                program: staged.clone(),
                message: format!("{error:#}"),
            })?;
        self.run_log.line(&format!(
            "installer for {} exited with code {}",
            family.display_name,
            exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "none".to_string())
        ));

        // The exit code above is informational only; the produced directory
        // is the post-condition that decides success.
        if !target.is_dir() {
            return Err(ProvisionError::InstallerDidNotProduceTarget {
                family: family.key.clone(),
                target: target.to_path_buf(),
            });
        }

        let marker = InstallMarker::from_installer(
            &family.key,
            1,
            &installer.name,
            installer.sha256.as_deref(),
        );
        if let Err(error) = write_install_marker(target, &marker) {
            tracing::warn!(family = %family.key, error = %error, "install marker write failed");
        }
        self.run_log.line(&format!(
            "installed {} instance 1 at '{}'",
            family.display_name,
            target.display()
        ));
        Ok(ProvisionOutcome::Installed)
    }

    fn clone_from_previous(
        &self,
        family: &FamilyConfig,
        index: u32,
        target: &Path,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let source = family.instance_dir(index - 1);
        if !source.is_dir() {
            return Err(ProvisionError::MissingCloneSource {
                family: family.key.clone(),
                index,
                source_dir: source,
            });
        }
        let stats = copy_tree_overwrite(&source, target).map_err(|error| {
            ProvisionError::CloneFailed {
                family: family.key.clone(),
                index,
                source_dir: source.clone(),
                message: format!("{error:#}"),
            }
        })?;
        let marker = InstallMarker::from_clone(&family.key, index, &source);
        if let Err(error) = write_install_marker(target, &marker) {
            tracing::warn!(family = %family.key, index, error = %error, "install marker write failed");
        }
        self.run_log.line(&format!(
            "cloned {} instance {index} from '{}' ({} files, {} bytes)",
            family.display_name,
            source.display(),
            stats.files_copied,
            stats.bytes_copied
        ));
        Ok(ProvisionOutcome::ClonedFrom(index - 1))
    }

    /// Provisions every slot for every family in strictly ascending index
    /// order, so each clone source is guaranteed fresh. A fatal error in one
    /// family is recorded, its later indices are skipped (their clone chain
    /// is broken), and the other families keep provisioning.
    pub async fn provision_all(
        &self,
        fleet: &FleetConfig,
        total_instances: u32,
        manifest: &Manifest,
    ) -> Result<ProvisionRunReport> {
        if total_instances == 0 {
            bail!("total instances must be at least 1");
        }
        if total_instances > fleet.max_instances {
            bail!(
                "total instances {} exceeds the configured maximum {}",
                total_instances,
                fleet.max_instances
            );
        }
        let mut installers = Vec::with_capacity(fleet.families.len());
        for family in &fleet.families {
            installers.push(manifest.application_descriptor(&family.installer_artifact)?);
        }

        let mut report = ProvisionRunReport::default();
        let mut failed_families: BTreeSet<String> = BTreeSet::new();
        for index in 1..=total_instances {
            for (family, installer) in fleet.families.iter().zip(&installers) {
                let target = family.instance_dir(index);
                if failed_families.contains(&family.key) {
                    self.run_log.line(&format!(
                        "skipping {} instance {index}: an earlier index failed this run",
                        family.display_name
                    ));
                    report.record(SlotReport {
                        family_key: family.key.clone(),
                        index,
                        target_dir: target,
                        status: SlotStatus::SkippedAfterFailure,
                        detail: Some("earlier index failed".to_string()),
                    });
                    continue;
                }
                match self.provision_instance(family, index, installer).await {
                    Ok(outcome) => {
                        let status = match outcome {
                            ProvisionOutcome::Installed => SlotStatus::Installed,
                            ProvisionOutcome::AlreadyPresent => SlotStatus::AlreadyPresent,
                            ProvisionOutcome::ClonedFrom(_) => SlotStatus::Cloned,
                        };
                        let detail = match outcome {
                            ProvisionOutcome::ClonedFrom(source_index) => {
                                Some(format!("cloned from index {source_index}"))
                            }
                            _ => None,
                        };
                        report.record(SlotReport {
                            family_key: family.key.clone(),
                            index,
                            target_dir: target,
                            status,
                            detail,
                        });
                        if !matches!(outcome, ProvisionOutcome::AlreadyPresent) {
                            self.apply_config_bundle(family, index, manifest, &mut report)
                                .await;
                        }
                    }
                    Err(error) => {
                        self.run_log.line(&format!(
                            "provisioning {} instance {index} failed: {error}",
                            family.display_name
                        ));
                        report.record(SlotReport {
                            family_key: family.key.clone(),
                            index,
                            target_dir: target,
                            status: SlotStatus::Failed,
                            detail: Some(error.to_string()),
                        });
                        failed_families.insert(family.key.clone());
                    }
                }
            }
        }
        Ok(report)
    }

    /// Fetches and runs every OS prerequisite installer named by the
    /// manifest, in stable name order. A fetch or spawn failure is fatal for
    /// the run; exit codes are only logged, because redistributable
    /// installers signal already-installed and reboot-required through
    /// nonzero codes.
    pub async fn install_prerequisites(&self, manifest: &Manifest) -> Result<usize> {
        let descriptors = manifest.prerequisite_descriptors();
        for descriptor in &descriptors {
            let staged = self
                .staging_dir
                .join("prerequisites")
                .join(artifact_file_name(descriptor));
            self.run_log
                .line(&format!("fetching prerequisite '{}'", descriptor.name));
            fetch(
                self.client,
                &descriptor.url,
                &staged,
                descriptor.sha256.as_deref(),
                &self.fetch_options,
            )
            .await
            .with_context(|| format!("failed to fetch prerequisite '{}'", descriptor.name))?;
            let exit_code = self
                .installer_runner
                .run_to_exit(&staged, &descriptor.install_args)
                .with_context(|| format!("failed to run prerequisite '{}'", descriptor.name))?;
            self.run_log.line(&format!(
                "prerequisite '{}' exited with code {}",
                descriptor.name,
                exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "none".to_string())
            ));
        }
        Ok(descriptors.len())
    }

    /// Fetches the per-instance config bundle into a freshly provisioned
    /// directory. Best-effort: the slot stays healthy even when the bundle
    /// cannot be placed.
    async fn apply_config_bundle(
        &self,
        family: &FamilyConfig,
        index: u32,
        manifest: &Manifest,
        report: &mut ProvisionRunReport,
    ) {
        let descriptor = match manifest.config_bundle_descriptor(index) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return,
            Err(error) => {
                self.run_log.line(&format!(
                    "config bundle for instance {index} could not be resolved: {error}"
                ));
                report.config_bundle_failures += 1;
                return;
            }
        };
        let destination = family.config_bundle_path(index);
        match fetch(
            self.client,
            &descriptor.url,
            &destination,
            descriptor.sha256.as_deref(),
            &self.fetch_options,
        )
        .await
        {
            Ok(_) => {
                report.config_bundles_applied += 1;
                self.run_log.line(&format!(
                    "placed config bundle for {} instance {index} at '{}'",
                    family.display_name,
                    destination.display()
                ));
            }
            Err(error) => {
                report.config_bundle_failures += 1;
                self.run_log.line(&format!(
                    "config bundle for {} instance {index} failed: {error}",
                    family.display_name
                ));
            }
        }
    }
}

fn artifact_file_name(descriptor: &ArtifactDescriptor) -> String {
    let tail = descriptor.url.rsplit('/').next().unwrap_or("");
    let tail = tail.split('?').next().unwrap_or(tail);
    if tail.is_empty() {
        format!("{}.bin", descriptor.name)
    } else {
        tail.to_string()
    }
}
