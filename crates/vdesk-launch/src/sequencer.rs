use std::time::Duration;

use vdesk_core::RunLog;
use vdesk_provision::FleetConfig;

use crate::compositor::DesktopCompositor;
use crate::process::ProcessLauncher;

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 30_000;
pub const DEFAULT_DESKTOP_NAME_PREFIX: &str = "vdesk";

/// Enumerates supported `LaunchPhase` values, in the order an instance
/// passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LaunchPhase {
    PendingDesktop,
    DesktopReady,
    ProcessesStarted,
    Settled,
}

impl LaunchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchPhase::PendingDesktop => "pending_desktop",
            LaunchPhase::DesktopReady => "desktop_ready",
            LaunchPhase::ProcessesStarted => "processes_started",
            LaunchPhase::Settled => "settled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub total_instances: u32,
    /// Pause after each instance's processes start, so a terminal finishes
    /// booting before the next desktop appears.
    pub settle_delay_ms: u64,
    pub desktop_name_prefix: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            total_instances: 1,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            desktop_name_prefix: DEFAULT_DESKTOP_NAME_PREFIX.to_string(),
        }
    }
}

/// One process started for an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyLaunch {
    pub family_key: String,
    pub pid: u32,
}

/// What happened to one instance slot during the launch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLaunchReport {
    pub index: u32,
    pub desktop_name: String,
    pub phase_reached: LaunchPhase,
    pub started: Vec<FamilyLaunch>,
    /// Families whose executable was absent; the slot still settles.
    pub missing_executables: Vec<String>,
    pub failures: Vec<String>,
    pub settle_applied: bool,
}

/// Launches instances strictly one at a time: create and activate the
/// instance's desktop, start one process per family on it, then hold for
/// the settle delay before moving on. A desktop that cannot be prepared
/// skips its instance entirely, settle included.
pub struct LaunchSequencer<'a> {
    pub compositor: &'a dyn DesktopCompositor,
    pub launcher: &'a dyn ProcessLauncher,
    pub config: LaunchConfig,
    pub run_log: &'a RunLog,
}

impl LaunchSequencer<'_> {
    pub fn desktop_name(&self, index: u32) -> String {
        format!("{}-{index}", self.config.desktop_name_prefix)
    }

    pub async fn launch_all(&self, fleet: &FleetConfig) -> Vec<InstanceLaunchReport> {
        let mut reports = Vec::with_capacity(self.config.total_instances as usize);
        for index in 1..=self.config.total_instances {
            reports.push(self.launch_instance(fleet, index).await);
        }
        self.run_log.line(&render_launch_report(&reports));
        reports
    }

    async fn launch_instance(&self, fleet: &FleetConfig, index: u32) -> InstanceLaunchReport {
        let desktop_name = self.desktop_name(index);
        let mut report = InstanceLaunchReport {
            index,
            desktop_name: desktop_name.clone(),
            phase_reached: LaunchPhase::PendingDesktop,
            started: Vec::new(),
            missing_executables: Vec::new(),
            failures: Vec::new(),
            settle_applied: false,
        };

        let prepared = self
            .compositor
            .ensure_desktop(&desktop_name)
            .and_then(|()| self.compositor.switch_desktop(&desktop_name));
        if let Err(error) = prepared {
            tracing::warn!(desktop = %desktop_name, error = %error, "desktop preparation failed");
            let message = format!("desktop '{desktop_name}' could not be prepared: {error:#}");
            self.run_log
                .line(&format!("instance {index} skipped: {message}"));
            report.failures.push(message);
            return report;
        }
        report.phase_reached = LaunchPhase::DesktopReady;
        self.run_log
            .line(&format!("desktop '{desktop_name}' active for instance {index}"));

        for family in &fleet.families {
            let executable = family.executable_path(index);
            if !executable.is_file() {
                self.run_log.line(&format!(
                    "{} instance {index} has no executable at '{}'; not started",
                    family.display_name,
                    executable.display()
                ));
                report.missing_executables.push(family.key.clone());
                continue;
            }
            match self.launcher.spawn_detached(
                &executable,
                &family.launch_args,
                &family.instance_dir(index),
            ) {
                Ok(pid) => {
                    self.run_log.line(&format!(
                        "started {} instance {index} (pid {pid}) on '{desktop_name}'",
                        family.display_name
                    ));
                    report.started.push(FamilyLaunch {
                        family_key: family.key.clone(),
                        pid,
                    });
                }
                Err(error) => {
                    tracing::warn!(family = %family.key, index, error = %error, "spawn failed");
                    let message = format!(
                        "starting {} instance {index} failed: {error:#}",
                        family.display_name
                    );
                    self.run_log.line(&message);
                    report.failures.push(message);
                }
            }
        }
        report.phase_reached = LaunchPhase::ProcessesStarted;

        // The slot settles even when nothing started; pacing is per slot,
        // not per process.
        if self.config.settle_delay_ms > 0 {
            self.run_log.line(&format!(
                "settling {} ms after instance {index}",
                self.config.settle_delay_ms
            ));
            tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        }
        report.settle_applied = true;
        report.phase_reached = LaunchPhase::Settled;
        report
    }
}

pub fn any_launch_failures(reports: &[InstanceLaunchReport]) -> bool {
    reports.iter().any(|report| !report.failures.is_empty())
}

pub fn render_launch_report(reports: &[InstanceLaunchReport]) -> String {
    let settled = reports
        .iter()
        .filter(|report| report.phase_reached == LaunchPhase::Settled)
        .count();
    let processes_started: usize = reports.iter().map(|report| report.started.len()).sum();
    let missing: usize = reports
        .iter()
        .map(|report| report.missing_executables.len())
        .sum();
    let failures: usize = reports.iter().map(|report| report.failures.len()).sum();
    format!(
        "launch summary: instances={} settled={} processes_started={} missing_executables={} failures={}",
        reports.len(),
        settled,
        processes_started,
        missing,
        failures,
    )
}
