//! Resumable, phased provisioning of branch sites.
//!
//! Sites from an inventory are brought up in four ordered phases, each
//! submitted to the dashboard as action batches:
//!
//! 1. **Networks**: one network per site, copied from a template network
//! 2. **Devices**: claim every site's devices into its network
//! 3. **Settings**: per-site device, uplink, VLAN, group policy and port setup
//! 4. **Teardown**: delete every recorded network
//!
//! Progress is kept in a [`Ledger`] file that is rewritten after every
//! mutating step, so an interrupted run picks up where it stopped.

pub mod builders;
pub mod config;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod orchestrator;
pub mod payload;
pub mod phase;

pub use builders::{ActionBuilders, BuildContext, SettingsMode, StandardBuilders};
pub use config::ProvisionerConfig;
pub use error::{ProvisionError, ProvisionResult};
pub use inventory::{load_inventory, DeviceRole, Site};
pub use ledger::{DeviceEntry, Ledger, ProvisioningRecord};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use payload::ActionSpec;
pub use phase::{Phase, PhaseReport, SiteFailure};
