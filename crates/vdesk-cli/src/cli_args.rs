use std::path::PathBuf;

use clap::Parser;

/// Command-line surface of the `vdesk` binary. Every flag can also come
/// from a `VDESK_*` environment variable so scheduled runs need no
/// arguments at all.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vdesk",
    version,
    about = "Provision, equip and launch isolated trading-terminal instances"
)]
pub struct Cli {
    /// Manifest URL naming every artifact of the run.
    #[arg(long, env = "VDESK_MANIFEST_URL")]
    pub manifest_url: String,

    /// Number of instance slots to provision; prompted for when omitted.
    #[arg(long, env = "VDESK_TOTAL_INSTANCES", value_parser = clap::value_parser!(u32).range(1..))]
    pub total_instances: Option<u32>,

    /// Fleet configuration override file (JSON).
    #[arg(long, env = "VDESK_FLEET_CONFIG")]
    pub fleet_config: Option<PathBuf>,

    /// Run log destination; defaults to a file in the system temp directory.
    #[arg(long, env = "VDESK_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Directory where installers and plugins are staged before use.
    #[arg(long, env = "VDESK_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Seconds to hold after each instance launch before starting the next.
    #[arg(long, env = "VDESK_SETTLE_SECONDS", default_value_t = 30)]
    pub settle_seconds: u64,

    /// Download attempts per artifact before the fetch is abandoned.
    #[arg(long, env = "VDESK_FETCH_ATTEMPTS", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub fetch_attempts: u32,

    /// Base delay between download attempts, in milliseconds.
    #[arg(long, env = "VDESK_FETCH_BASE_DELAY_MS", default_value_t = 1_000)]
    pub fetch_base_delay_ms: u64,

    /// Name prefix for the per-instance virtual desktops.
    #[arg(long, env = "VDESK_DESKTOP_PREFIX", default_value = "vdesk")]
    pub desktop_prefix: String,

    /// Desktop helper binary; defaults to one beside the vdesk executable.
    #[arg(long, env = "VDESK_DESKTOP_HELPER")]
    pub desktop_helper: Option<PathBuf>,

    /// Provision and distribute only; skip the launch phase.
    #[arg(long)]
    pub no_launch: bool,

    /// Hold the console open when the run finishes.
    #[arg(long)]
    pub interactive: bool,

    /// Debug-level diagnostics on stderr.
    #[arg(short, long)]
    pub verbose: bool,
}
