//! Site and context fixtures.

use fleet_dashboard::PollConfig;
use fleet_provisioner::{BuildContext, OrchestratorOptions, Site};
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::FAKE_ORG;

/// Builder for inventory sites.
///
/// # Example
///
/// ```ignore
/// let site = SiteFixture::new("12", "Austin, TX").without_camera().build();
/// ```
#[derive(Debug, Clone)]
pub struct SiteFixture {
    site: Site,
}

impl SiteFixture {
    /// A fully equipped site with serials derived from the site number.
    pub fn new(site_number: &str, location: &str) -> Self {
        let octet: u8 = site_number.parse().unwrap_or(0);
        Self {
            site: Site {
                site_number: site_number.to_string(),
                location: location.to_string(),
                gateway: Some(format!("Q2MX-{:0>4}", site_number)),
                switch: Some(format!("Q2MS-{:0>4}", site_number)),
                access_point: Some(format!("Q2MR-{:0>4}", site_number)),
                camera: Some(format!("Q2MV-{:0>4}", site_number)),
                management_vlan: format!("{}1", site_number).parse().unwrap_or(1),
                switch_ip: Some(Ipv4Addr::new(10, octet, 1, 2)),
                access_point_ip: Some(Ipv4Addr::new(10, octet, 1, 3)),
                address: None,
            },
        }
    }

    /// Leaves the camera slot empty.
    pub fn without_camera(mut self) -> Self {
        self.site.camera = None;
        self
    }

    /// Sets the map address.
    pub fn with_address(mut self, address: &str) -> Self {
        self.site.address = Some(address.to_string());
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Site {
        self.site
    }
}

/// Three branch sites in different states.
pub fn branch_sites() -> Vec<Site> {
    vec![
        SiteFixture::new("1", "San Jose, CA").build(),
        SiteFixture::new("2", "Austin, TX").without_camera().build(),
        SiteFixture::new("3", "Raleigh, NC").build(),
    ]
}

/// Build context for [`FAKE_ORG`] with a fixed tag seed.
pub fn test_context() -> BuildContext {
    BuildContext {
        organization_id: FAKE_ORG.to_string(),
        network_type: "appliance switch wireless camera".to_string(),
        time_zone: "America/Los_Angeles".to_string(),
        operator_name: "fleet-test".to_string(),
        custom_tags: Vec::new(),
        tag_seed: Some(7),
        dns_servers: vec![Ipv4Addr::new(208, 67, 222, 222)],
    }
}

/// Options with no throttling delay and fast polling.
pub fn test_options() -> OrchestratorOptions {
    OrchestratorOptions {
        poll: PollConfig {
            interval: Duration::from_millis(1),
            max_attempts: Some(50),
        },
        inter_batch_delay: Duration::ZERO,
        ..OrchestratorOptions::default()
    }
}

/// Writes `sites` as an inventory file; returns its path.
pub fn write_inventory(dir: &Path, sites: &[Site]) -> io::Result<PathBuf> {
    let path = dir.join("inventory.json");
    let body = serde_json::to_string_pretty(sites)?;
    std::fs::write(&path, body)?;
    Ok(path)
}
