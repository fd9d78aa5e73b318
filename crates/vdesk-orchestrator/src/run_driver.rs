use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use vdesk_cli::{resolve_total_instances, Cli};
use vdesk_core::RunLog;
use vdesk_fetch::FetchOptions;
use vdesk_launch::{
    any_launch_failures, HelperBinaryCompositor, InstanceLaunchReport, LaunchConfig,
    LaunchSequencer, SystemProcessLauncher,
};
use vdesk_manifest::resolve_manifest;
use vdesk_provision::{
    load_fleet_config, render_distribution_report, render_provision_report, DistributionReport,
    FleetConfig, PluginDistributor, ProvisionEngine, ProvisionRunReport, SystemInstallerRunner,
};

use crate::preflight::{require_elevation, SystemElevationProbe};

const HTTP_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Everything a run needs, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub manifest_url: String,
    pub total_instances: Option<u32>,
    pub fleet_config: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub settle_delay_ms: u64,
    pub fetch_options: FetchOptions,
    pub desktop_prefix: String,
    pub desktop_helper: Option<PathBuf>,
    pub no_launch: bool,
    pub interactive: bool,
}

impl RunOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            manifest_url: cli.manifest_url.clone(),
            total_instances: cli.total_instances,
            fleet_config: cli.fleet_config.clone(),
            log_file: cli.log_file.clone(),
            staging_dir: cli.staging_dir.clone(),
            settle_delay_ms: cli.settle_seconds.saturating_mul(1_000),
            fetch_options: FetchOptions {
                max_attempts: cli.fetch_attempts as usize,
                base_delay_ms: cli.fetch_base_delay_ms,
            },
            desktop_prefix: cli.desktop_prefix.clone(),
            desktop_helper: cli.desktop_helper.clone(),
            no_launch: cli.no_launch,
            interactive: cli.interactive,
        }
    }
}

/// Outcome of a whole run. Phase failures are recorded here rather than
/// aborting, so the binary can both finish the run and exit nonzero.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_instances: u32,
    pub prerequisites_installed: usize,
    pub provision: ProvisionRunReport,
    pub distribution: DistributionReport,
    pub launches: Vec<InstanceLaunchReport>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        !self.provision.has_failures()
            && !self.distribution.has_failures()
            && !any_launch_failures(&self.launches)
    }
}

pub fn render_run_summary(summary: &RunSummary) -> String {
    format!(
        "run summary: instances={} prerequisites={} result={}",
        summary.total_instances,
        summary.prerequisites_installed,
        if summary.is_success() {
            "success"
        } else {
            "completed_with_failures"
        }
    )
}

/// Executes one full run: preflight, manifest resolve, prerequisites,
/// provisioning, plugin distribution, and (unless suppressed) the paced
/// launch pass.
pub async fn run(options: RunOptions) -> Result<RunSummary> {
    require_elevation(&SystemElevationProbe)?;

    let log_path = options.log_file.clone().unwrap_or_else(RunLog::default_path);
    let run_log = RunLog::open(log_path, true)?;
    run_log.line("vdesk run starting");

    let fleet = load_fleet(&options)?;
    tracing::debug!(families = fleet.families.len(), "fleet configuration loaded");
    let total_instances = {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        resolve_total_instances(
            options.total_instances,
            fleet.max_instances,
            &mut input,
            &mut output,
        )?
    };
    run_log.line(&format!(
        "provisioning {total_instances} instance slot(s) across {} family(ies)",
        fleet.families.len()
    ));

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(HTTP_CONNECT_TIMEOUT_MS))
        .build()
        .context("failed to build the http client")?;
    let manifest = resolve_manifest(&client, &options.manifest_url).await?;
    run_log.line(&format!(
        "manifest resolved: {} prerequisite(s), {} application(s), {} plugin(s), {} config bundle(s)",
        manifest.prerequisites.len(),
        manifest.applications.len(),
        manifest.plugins.len(),
        manifest.config_bundles.len()
    ));

    let staging_dir = options
        .staging_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("vdesk-staging"));
    tracing::debug!(staging_dir = %staging_dir.display(), "staging directory resolved");
    let installer_runner = SystemInstallerRunner;
    let engine = ProvisionEngine {
        client: &client,
        fetch_options: options.fetch_options.clone(),
        staging_dir: staging_dir.clone(),
        installer_runner: &installer_runner,
        run_log: &run_log,
    };

    let prerequisites_installed = engine.install_prerequisites(&manifest).await?;
    let provision = engine
        .provision_all(&fleet, total_instances, &manifest)
        .await?;
    run_log.line(&render_provision_report(&provision));

    let plugins = manifest.plugin_artifacts()?;
    let distributor = PluginDistributor {
        client: &client,
        fetch_options: options.fetch_options.clone(),
        staging_dir,
        run_log: &run_log,
    };
    let distribution = distributor
        .distribute(&plugins, &fleet, total_instances, &provision.fatal_slots())
        .await;
    run_log.line(&render_distribution_report(&distribution));

    let launches = if options.no_launch {
        run_log.line("launch phase disabled for this run");
        Vec::new()
    } else {
        let compositor = match &options.desktop_helper {
            Some(path) => HelperBinaryCompositor::new(path.clone()),
            None => HelperBinaryCompositor::beside_current_exe(),
        };
        let launcher = SystemProcessLauncher;
        let sequencer = LaunchSequencer {
            compositor: &compositor,
            launcher: &launcher,
            config: LaunchConfig {
                total_instances,
                settle_delay_ms: options.settle_delay_ms,
                desktop_name_prefix: options.desktop_prefix.clone(),
            },
            run_log: &run_log,
        };
        sequencer.launch_all(&fleet).await
    };

    let summary = RunSummary {
        total_instances,
        prerequisites_installed,
        provision,
        distribution,
        launches,
    };
    run_log.line(&render_run_summary(&summary));

    if options.interactive {
        hold_console_open()?;
    }
    Ok(summary)
}

fn load_fleet(options: &RunOptions) -> Result<FleetConfig> {
    match &options.fleet_config {
        Some(path) => load_fleet_config(path),
        None => Ok(FleetConfig::builtin_default()),
    }
}

fn hold_console_open() -> Result<()> {
    println!("Run complete. Press Enter to close.");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read console input")?;
    Ok(())
}
