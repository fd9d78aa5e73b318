//! Paced launch of provisioned terminal instances onto virtual desktops.
//!
//! Instances start strictly one at a time: each gets a numbered desktop
//! created and activated through the desktop helper, one detached process
//! per family, and a settle delay before the next instance begins. Slots
//! with missing executables still consume their desktop and settle time so
//! the pacing stays uniform across runs.

pub mod compositor;
pub mod process;
pub mod sequencer;

pub use compositor::{DesktopCompositor, HelperBinaryCompositor, DEFAULT_DESKTOP_HELPER};
pub use process::{ProcessLauncher, SystemProcessLauncher};
pub use sequencer::{
    any_launch_failures, render_launch_report, FamilyLaunch, InstanceLaunchReport, LaunchConfig,
    LaunchPhase, LaunchSequencer, DEFAULT_DESKTOP_NAME_PREFIX, DEFAULT_SETTLE_DELAY_MS,
};
