use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use vdesk_core::{sha256_file_hex, RunLog};
use vdesk_fetch::{fetch, FetchOptions};
use vdesk_manifest::PluginArtifact;

use crate::fleet::FleetConfig;

/// A plugin binary staged locally with a verified hash, ready to fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPlugin {
    pub name: String,
    pub version: String,
    pub file_name: String,
    pub staged_path: PathBuf,
    pub sha256: String,
}

/// One destination file that could not be written. The fan-out records it
/// and keeps going; a single bad destination must not starve the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    pub plugin: String,
    pub destination: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub staged: usize,
    pub staging_failed: usize,
    pub destinations: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped_missing: usize,
    pub copy_failures: Vec<CopyFailure>,
}

impl DistributionReport {
    pub fn has_failures(&self) -> bool {
        self.staging_failed > 0 || !self.copy_failures.is_empty()
    }
}

pub fn render_distribution_report(report: &DistributionReport) -> String {
    format!(
        "distribution summary: staged={} staging_failed={} destinations={} updated={} up_to_date={} skipped_missing={} copy_failed={}",
        report.staged,
        report.staging_failed,
        report.destinations,
        report.updated,
        report.up_to_date,
        report.skipped_missing,
        report.copy_failures.len(),
    )
}

/// Stages the manifest's plugin set once and copies it into every
/// destination directory that exists right now.
pub struct PluginDistributor<'a> {
    pub client: &'a reqwest::Client,
    pub fetch_options: FetchOptions,
    pub staging_dir: PathBuf,
    pub run_log: &'a RunLog,
}

impl PluginDistributor<'_> {
    /// Full distribution pass: stage, discover, fan out.
    pub async fn distribute(
        &self,
        plugins: &[PluginArtifact],
        fleet: &FleetConfig,
        total_instances: u32,
        excluded_slots: &BTreeSet<(String, u32)>,
    ) -> DistributionReport {
        let mut report = DistributionReport::default();
        if plugins.is_empty() {
            self.run_log.line("manifest carries no plugins; nothing to distribute");
            return report;
        }
        let staged = self.stage_plugins(plugins, &mut report).await;
        let destinations = discover_destinations(fleet, total_instances, excluded_slots);
        report.destinations = destinations.len();
        self.run_log.line(&format!(
            "distributing {} plugin(s) to {} destination(s)",
            staged.len(),
            destinations.len()
        ));
        self.fan_out(&staged, &destinations, &mut report);
        report
    }

    /// Downloads each plugin into the staging area with hash verification.
    /// A plugin that cannot be staged is dropped from this run; the others
    /// still distribute.
    pub async fn stage_plugins(
        &self,
        plugins: &[PluginArtifact],
        report: &mut DistributionReport,
    ) -> Vec<StagedPlugin> {
        let mut staged = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            let staged_path = self.staging_dir.join("plugins").join(&plugin.file_name);
            match fetch(
                self.client,
                &plugin.url,
                &staged_path,
                Some(&plugin.sha256),
                &self.fetch_options,
            )
            .await
            {
                Ok(fetched) => {
                    self.run_log.line(&format!(
                        "staged plugin '{}' {} ({} bytes, attempts={})",
                        plugin.name, plugin.version, fetched.bytes_written, fetched.attempts
                    ));
                    report.staged += 1;
                    staged.push(StagedPlugin {
                        name: plugin.name.clone(),
                        version: plugin.version.clone(),
                        file_name: plugin.file_name.clone(),
                        staged_path,
                        sha256: plugin.sha256.clone(),
                    });
                }
                Err(error) => {
                    report.staging_failed += 1;
                    self.run_log.line(&format!(
                        "staging plugin '{}' {} failed: {error}",
                        plugin.name, plugin.version
                    ));
                }
            }
        }
        staged
    }

    /// Copies every staged plugin into every destination. Destinations that
    /// do not exist are skipped; a copy error is recorded per (plugin,
    /// destination) pair and the remaining pairs still run. Files whose
    /// content already matches the staged hash are left untouched.
    pub fn fan_out(
        &self,
        staged: &[StagedPlugin],
        destinations: &[PathBuf],
        report: &mut DistributionReport,
    ) {
        for destination in destinations {
            if !destination.is_dir() {
                report.skipped_missing += 1;
                self.run_log.line(&format!(
                    "destination '{}' does not exist; skipping",
                    destination.display()
                ));
                continue;
            }
            for plugin in staged {
                let target = destination.join(&plugin.file_name);
                if target_matches(&target, &plugin.sha256) {
                    report.up_to_date += 1;
                    continue;
                }
                match std::fs::copy(&plugin.staged_path, &target) {
                    Ok(_) => {
                        report.updated += 1;
                        self.run_log.line(&format!(
                            "placed plugin '{}' at '{}'",
                            plugin.name,
                            target.display()
                        ));
                    }
                    Err(error) => {
                        self.run_log.line(&format!(
                            "copying plugin '{}' to '{}' failed: {error}",
                            plugin.name,
                            target.display()
                        ));
                        report.copy_failures.push(CopyFailure {
                            plugin: plugin.name.clone(),
                            destination: target,
                            message: error.to_string(),
                        });
                    }
                }
            }
        }
    }
}

fn target_matches(target: &Path, expected_sha256: &str) -> bool {
    if !target.is_file() {
        return false;
    }
    match sha256_file_hex(target) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected_sha256),
        Err(error) => {
            tracing::debug!(target = %target.display(), error = %error, "hash probe failed; rewriting");
            false
        }
    }
}

/// Probes the filesystem fresh for plugin destinations: the plugin directory
/// of every provisioned instance slot that did not fail this run, plus the
/// plugin directory of every user profile. Sorted so runs are comparable.
pub fn discover_destinations(
    fleet: &FleetConfig,
    total_instances: u32,
    excluded_slots: &BTreeSet<(String, u32)>,
) -> Vec<PathBuf> {
    let mut destinations = Vec::new();
    for family in &fleet.families {
        for index in 1..=total_instances {
            if excluded_slots.contains(&(family.key.clone(), index)) {
                continue;
            }
            if family.instance_dir(index).is_dir() {
                destinations.push(family.plugin_dir(index));
            }
        }
    }
    match std::fs::read_dir(&fleet.profiles_root) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    destinations.push(path.join(&fleet.profile_plugin_subdir));
                }
            }
        }
        Err(error) => {
            tracing::warn!(
                profiles_root = %fleet.profiles_root.display(),
                error = %error,
                "profiles root not readable; distributing to instances only"
            );
        }
    }
    destinations.sort();
    destinations
}
