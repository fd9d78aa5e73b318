use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use httpmock::prelude::*;
use serde_json::json;

use vdesk_core::{sha256_hex, RunLog};
use vdesk_fetch::FetchOptions;
use vdesk_launch::{
    any_launch_failures, DesktopCompositor, LaunchConfig, LaunchPhase, LaunchSequencer,
    ProcessLauncher,
};
use vdesk_manifest::{parse_manifest, Manifest};
use vdesk_provision::{
    load_install_marker, FleetConfig, InstallSource, InstallerRunner, PluginDistributor,
    ProvisionEngine,
};

const INSTALLER_PAYLOAD: &[u8] = b"installer payload";
const PLUGIN_TREND: &[u8] = b"trend follower binary";
const PLUGIN_RISK: &[u8] = b"risk guard binary";
const PLUGIN_NEWS: &[u8] = b"news filter binary";
const BUNDLE_ONE: &[u8] = b"login=account-1";
const BUNDLE_TWO: &[u8] = b"login=account-2";

/// Stands in for the vendor setup programs: creates the directory registered
/// for the installer it is asked to run, with an executable and an empty
/// plugin directory inside, the way a real terminal install looks.
struct ScriptedInstaller {
    creates: Vec<(String, PathBuf)>,
    runs: Mutex<Vec<PathBuf>>,
}

impl ScriptedInstaller {
    fn new(creates: Vec<(&str, PathBuf)>) -> Self {
        Self {
            creates: creates
                .into_iter()
                .map(|(name, dir)| (name.to_string(), dir))
                .collect(),
            runs: Mutex::new(Vec::new()),
        }
    }

    fn run_count(&self) -> usize {
        self.runs.lock().expect("runs lock").len()
    }
}

impl InstallerRunner for ScriptedInstaller {
    fn run_to_exit(&self, program: &Path, _args: &[String]) -> Result<Option<i32>> {
        self.runs
            .lock()
            .expect("runs lock")
            .push(program.to_path_buf());
        let file_name = program
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        for (name, dir) in &self.creates {
            if name == file_name {
                std::fs::create_dir_all(dir.join("experts"))?;
                std::fs::create_dir_all(dir.join("config"))?;
                std::fs::write(dir.join("terminal.exe"), b"terminal binary")?;
            }
        }
        Ok(Some(0))
    }
}

#[derive(Default)]
struct RecordingCompositor {
    events: Mutex<Vec<String>>,
}

impl RecordingCompositor {
    fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }
}

impl DesktopCompositor for RecordingCompositor {
    fn ensure_desktop(&self, name: &str) -> Result<()> {
        self.events
            .lock()
            .expect("events lock")
            .push(format!("ensure:{name}"));
        Ok(())
    }

    fn switch_desktop(&self, name: &str) -> Result<()> {
        self.events
            .lock()
            .expect("events lock")
            .push(format!("switch:{name}"));
        Ok(())
    }

    fn list_desktops(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

struct RecordingLauncher {
    spawns: Mutex<Vec<PathBuf>>,
    next_pid: AtomicU32,
}

impl RecordingLauncher {
    fn new() -> Self {
        Self {
            spawns: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(500),
        }
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn spawn_detached(
        &self,
        executable: &Path,
        _args: &[String],
        _working_dir: &Path,
    ) -> Result<u32> {
        self.spawns
            .lock()
            .expect("spawns lock")
            .push(executable.to_path_buf());
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }
}

fn test_fleet(root: &Path) -> FleetConfig {
    let mut fleet = FleetConfig::builtin_default();
    for (slot, name) in fleet.families.iter_mut().zip(["terminal-a", "terminal-b"]) {
        slot.base_install_dir = root.join("apps").join(name);
    }
    fleet.profiles_root = root.join("profiles");
    fleet.profile_plugin_subdir = Path::new("Terminal").join("Experts");
    fleet
}

fn fleet_manifest(server: &MockServer) -> Manifest {
    let document = json!({
        "schema_version": 1,
        "base_url": server.base_url(),
        "applications": {
            "terminal-a-setup": {
                "url": server.url("/terminal-a-setup.exe"),
                "sha256": sha256_hex(INSTALLER_PAYLOAD),
                "install_args": ["/silent"],
            },
            "terminal-b-setup": {
                "url": server.url("/terminal-b-setup.exe"),
                "sha256": sha256_hex(INSTALLER_PAYLOAD),
            },
        },
        "plugins": {
            "trend-follower": {
                "version": "2.4.1",
                "sha256": sha256_hex(PLUGIN_TREND),
                "url": server.url("/plugins/trend-follower.dll"),
            },
            "risk-guard": {
                "version": "1.9.0",
                "sha256": sha256_hex(PLUGIN_RISK),
                "url": server.url("/plugins/risk-guard.dll"),
            },
            "news-filter": {
                "version": "3.0.2",
                "sha256": sha256_hex(PLUGIN_NEWS),
                "url": server.url("/plugins/news-filter.dll"),
            },
        },
        "config_bundles": {
            "1": { "sha256": sha256_hex(BUNDLE_ONE) },
            "2": { "sha256": sha256_hex(BUNDLE_TWO) },
        },
    });
    parse_manifest(&document.to_string()).expect("manifest")
}

fn mock_artifacts(server: &MockServer) {
    for (path, payload) in [
        ("/terminal-a-setup.exe", INSTALLER_PAYLOAD),
        ("/terminal-b-setup.exe", INSTALLER_PAYLOAD),
        ("/plugins/trend-follower.dll", PLUGIN_TREND),
        ("/plugins/risk-guard.dll", PLUGIN_RISK),
        ("/plugins/news-filter.dll", PLUGIN_NEWS),
        ("/config/instance-1.ini", BUNDLE_ONE),
        ("/config/instance-2.ini", BUNDLE_TWO),
    ] {
        server.mock(|when, then| {
            when.method(GET).path(path);
            then.status(200).body(payload);
        });
    }
}

#[tokio::test]
async fn full_run_provisions_distributes_and_launches_two_instances() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fleet = test_fleet(temp.path());
    for profile in ["operator", "analyst"] {
        std::fs::create_dir_all(
            fleet
                .profiles_root
                .join(profile)
                .join(&fleet.profile_plugin_subdir),
        )
        .expect("profile dir");
    }

    let server = MockServer::start();
    mock_artifacts(&server);
    let manifest = fleet_manifest(&server);

    let installer = ScriptedInstaller::new(vec![
        ("terminal-a-setup.exe", fleet.families[0].instance_dir(1)),
        ("terminal-b-setup.exe", fleet.families[1].instance_dir(1)),
    ]);
    let client = reqwest::Client::new();
    let log = RunLog::open(temp.path().join("run.log"), false).expect("log");
    let engine = ProvisionEngine {
        client: &client,
        fetch_options: FetchOptions {
            max_attempts: 2,
            base_delay_ms: 0,
        },
        staging_dir: temp.path().join("staging"),
        installer_runner: &installer,
        run_log: &log,
    };

    // First pass: index 1 installs, index 2 clones, bundles land per slot.
    let provision = engine
        .provision_all(&fleet, 2, &manifest)
        .await
        .expect("provision");
    assert_eq!(provision.installed, 2);
    assert_eq!(provision.cloned, 2);
    assert_eq!(provision.failed, 0);
    assert_eq!(provision.config_bundles_applied, 4);
    assert!(provision.fatal_slots().is_empty());
    assert_eq!(installer.run_count(), 2);

    for family in &fleet.families {
        assert_eq!(
            std::fs::read(family.config_bundle_path(1)).expect("bundle 1"),
            BUNDLE_ONE
        );
        assert_eq!(
            std::fs::read(family.config_bundle_path(2)).expect("bundle 2"),
            BUNDLE_TWO
        );
        let marker = load_install_marker(&family.instance_dir(2))
            .expect("marker load")
            .expect("marker present");
        assert_eq!(marker.source, InstallSource::Clone);
    }

    // Plugin set fans out to both instances of both families and to both
    // user profiles.
    let plugins = manifest.plugin_artifacts().expect("plugins");
    let distributor = PluginDistributor {
        client: &client,
        fetch_options: FetchOptions {
            max_attempts: 2,
            base_delay_ms: 0,
        },
        staging_dir: temp.path().join("staging"),
        run_log: &log,
    };
    let distribution = distributor
        .distribute(&plugins, &fleet, 2, &provision.fatal_slots())
        .await;
    assert_eq!(distribution.staged, 3);
    assert_eq!(distribution.destinations, 6);
    assert_eq!(distribution.updated, 18);
    assert!(!distribution.has_failures());
    assert_eq!(
        std::fs::read(fleet.families[1].plugin_dir(2).join("trend-follower.dll"))
            .expect("instance copy"),
        PLUGIN_TREND
    );
    assert_eq!(
        std::fs::read(
            fleet
                .profiles_root
                .join("operator")
                .join(&fleet.profile_plugin_subdir)
                .join("news-filter.dll")
        )
        .expect("profile copy"),
        PLUGIN_NEWS
    );

    // Paced launch: one desktop per instance, both families started on each.
    let compositor = RecordingCompositor::default();
    let launcher = RecordingLauncher::new();
    let sequencer = LaunchSequencer {
        compositor: &compositor,
        launcher: &launcher,
        config: LaunchConfig {
            total_instances: 2,
            settle_delay_ms: 0,
            desktop_name_prefix: "vdesk".to_string(),
        },
        run_log: &log,
    };
    let launches = sequencer.launch_all(&fleet).await;
    assert_eq!(
        compositor.events(),
        vec![
            "ensure:vdesk-1",
            "switch:vdesk-1",
            "ensure:vdesk-2",
            "switch:vdesk-2",
        ]
    );
    assert_eq!(launches.len(), 2);
    for report in &launches {
        assert_eq!(report.phase_reached, LaunchPhase::Settled);
        assert!(report.settle_applied);
        assert_eq!(report.started.len(), 2);
    }
    assert!(!any_launch_failures(&launches));

    // Second pass converges without re-running installers or rewriting
    // plugins; present slots are left untouched, bundles included.
    let rerun = engine
        .provision_all(&fleet, 2, &manifest)
        .await
        .expect("rerun");
    assert_eq!(rerun.already_present, 4);
    assert_eq!(rerun.installed, 0);
    assert_eq!(rerun.cloned, 0);
    assert_eq!(rerun.config_bundles_applied, 0);
    assert_eq!(installer.run_count(), 2, "installers ran once per family in total");

    let redistribution = distributor
        .distribute(&plugins, &fleet, 2, &rerun.fatal_slots())
        .await;
    assert_eq!(redistribution.updated, 0);
    assert_eq!(redistribution.up_to_date, 18);

    let raw_log = std::fs::read_to_string(temp.path().join("run.log")).expect("run log");
    assert!(raw_log.contains("installed Terminal A instance 1"));
    assert!(raw_log.contains("cloned Terminal B instance 2"));
    assert!(raw_log.contains("staged plugin 'trend-follower'"));
    assert!(raw_log.contains("already present"));
}

#[tokio::test]
async fn family_failure_is_isolated_across_all_phases() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fleet = test_fleet(temp.path());

    let server = MockServer::start();
    mock_artifacts(&server);
    let manifest = fleet_manifest(&server);

    // Terminal A's installer produces nothing; Terminal B's works.
    let installer = ScriptedInstaller::new(vec![(
        "terminal-b-setup.exe",
        fleet.families[1].instance_dir(1),
    )]);
    let client = reqwest::Client::new();
    let log = RunLog::open(temp.path().join("run.log"), false).expect("log");
    let engine = ProvisionEngine {
        client: &client,
        fetch_options: FetchOptions {
            max_attempts: 1,
            base_delay_ms: 0,
        },
        staging_dir: temp.path().join("staging"),
        installer_runner: &installer,
        run_log: &log,
    };

    let provision = engine
        .provision_all(&fleet, 2, &manifest)
        .await
        .expect("provision");
    assert_eq!(provision.failed, 1);
    assert_eq!(provision.skipped_after_failure, 1);
    assert_eq!(provision.installed, 1);
    assert_eq!(provision.cloned, 1);

    // Distribution only sees the healthy family's directories.
    let plugins = manifest.plugin_artifacts().expect("plugins");
    let distributor = PluginDistributor {
        client: &client,
        fetch_options: FetchOptions {
            max_attempts: 1,
            base_delay_ms: 0,
        },
        staging_dir: temp.path().join("staging"),
        run_log: &log,
    };
    let distribution = distributor
        .distribute(&plugins, &fleet, 2, &provision.fatal_slots())
        .await;
    assert_eq!(distribution.destinations, 2);
    assert_eq!(distribution.updated, 6, "3 plugins into terminal-b's 2 instances");

    // The launch pass still paces both slots; the broken family simply has
    // nothing to start.
    let compositor = RecordingCompositor::default();
    let launcher = RecordingLauncher::new();
    let sequencer = LaunchSequencer {
        compositor: &compositor,
        launcher: &launcher,
        config: LaunchConfig {
            total_instances: 2,
            settle_delay_ms: 0,
            desktop_name_prefix: "vdesk".to_string(),
        },
        run_log: &log,
    };
    let launches = sequencer.launch_all(&fleet).await;
    assert_eq!(launches.len(), 2);
    for report in &launches {
        assert_eq!(report.phase_reached, LaunchPhase::Settled);
        assert!(report.settle_applied);
        assert_eq!(report.missing_executables, vec!["terminal-a".to_string()]);
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.started[0].family_key, "terminal-b");
    }
    assert!(!any_launch_failures(&launches));
}
