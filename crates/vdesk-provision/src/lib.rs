//! Idempotent provisioning for the vdesk terminal fleet.
//!
//! The provisioner converges every (family, instance) slot to the installed
//! state by probing the filesystem fresh on each run: a present directory is
//! left alone, index 1 installs through the family's unattended installer,
//! and higher indices clone their predecessor. The distributor then fans the
//! manifest's plugin set out to every instance and user-profile plugin
//! directory that exists. Both halves record per-slot results instead of
//! aborting, so one broken family or destination never starves the rest of
//! the run.

pub mod distributor;
pub mod fleet;
pub mod marker;
pub mod provisioner;

pub use distributor::{
    discover_destinations, render_distribution_report, CopyFailure, DistributionReport,
    PluginDistributor, StagedPlugin,
};
pub use fleet::{
    load_fleet_config, validate_fleet_config, FamilyConfig, FleetConfig, DEFAULT_MAX_INSTANCES,
    FLEET_CONFIG_SCHEMA_VERSION,
};
pub use marker::{
    load_install_marker, write_install_marker, InstallMarker, InstallSource,
    INSTALL_MARKER_FILE_NAME, INSTALL_MARKER_SCHEMA_VERSION,
};
pub use provisioner::{
    render_provision_report, InstallerRunner, ProvisionEngine, ProvisionError, ProvisionOutcome,
    ProvisionRunReport, SlotReport, SlotStatus, SystemInstallerRunner,
};
