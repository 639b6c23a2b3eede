//! Site inventory model.
//!
//! The inventory is a JSON array of [`Site`] objects, one per remote site.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{ProvisionError, ProvisionResult};

/// Role a device plays at a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceRole {
    /// Security appliance / WAN gateway
    Gateway,
    /// Access switch
    Switch,
    /// Wireless access point
    AccessPoint,
    /// Security camera
    Camera,
}

impl DeviceRole {
    /// Roles in claim/configuration order.
    pub const ALL: [DeviceRole; 4] = [
        DeviceRole::Gateway,
        DeviceRole::Switch,
        DeviceRole::AccessPoint,
        DeviceRole::Camera,
    ];

    /// Human-readable description, used as the device name.
    pub fn description(&self) -> &'static str {
        match self {
            DeviceRole::Gateway => "SD-WAN UTM gateway",
            DeviceRole::Switch => "Access switch",
            DeviceRole::AccessPoint => "Wireless AP",
            DeviceRole::Camera => "Security camera",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One inventory row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Stable site number (also the second octet of the site's subnets)
    pub site_number: String,
    /// Location, e.g. "San Jose, CA"
    pub location: String,
    /// Gateway serial
    #[serde(default)]
    pub gateway: Option<String>,
    /// Switch serial
    #[serde(default)]
    pub switch: Option<String>,
    /// Access point serial
    #[serde(default)]
    pub access_point: Option<String>,
    /// Camera serial
    #[serde(default)]
    pub camera: Option<String>,
    /// Management VLAN id
    pub management_vlan: u16,
    /// Static management IP of the switch
    #[serde(default)]
    pub switch_ip: Option<Ipv4Addr>,
    /// Static management IP of the access point
    #[serde(default)]
    pub access_point_ip: Option<Ipv4Addr>,
    /// Street address; the location is used when absent
    #[serde(default)]
    pub address: Option<String>,
}

impl Site {
    /// Network name derived from the location.
    pub fn network_name(&self) -> String {
        self.location.replace(',', " -")
    }

    /// Serial configured for a role, ignoring blank cells.
    pub fn serial(&self, role: DeviceRole) -> Option<&str> {
        let serial = match role {
            DeviceRole::Gateway => &self.gateway,
            DeviceRole::Switch => &self.switch,
            DeviceRole::AccessPoint => &self.access_point,
            DeviceRole::Camera => &self.camera,
        };
        serial.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// `(serial, role)` for every device present at the site.
    pub fn devices(&self) -> Vec<(String, DeviceRole)> {
        DeviceRole::ALL
            .iter()
            .filter_map(|&role| self.serial(role).map(|s| (s.to_string(), role)))
            .collect()
    }

    /// Static management IP for a role, if one is assigned.
    pub fn management_ip(&self, role: DeviceRole) -> Option<Ipv4Addr> {
        match role {
            DeviceRole::Switch => self.switch_ip,
            DeviceRole::AccessPoint => self.access_point_ip,
            _ => None,
        }
    }

    /// Address placed on device map markers.
    pub fn map_address(&self) -> &str {
        self.address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(&self.location)
    }
}

/// Loads and validates an inventory file.
pub fn load_inventory(path: &Path) -> ProvisionResult<Vec<Site>> {
    let inventory_err = |message: String| ProvisionError::Inventory {
        path: path.to_path_buf(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| inventory_err(e.to_string()))?;
    let sites: Vec<Site> =
        serde_json::from_str(&content).map_err(|e| inventory_err(e.to_string()))?;
    validate_sites(&sites).map_err(inventory_err)?;
    Ok(sites)
}

/// Checks that site numbers are unique and rows are usable.
pub fn validate_sites(sites: &[Site]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for site in sites {
        if site.site_number.trim().is_empty() {
            return Err("site with empty site_number".to_string());
        }
        if site.location.trim().is_empty() {
            return Err(format!("site {} has an empty location", site.site_number));
        }
        if !seen.insert(site.site_number.as_str()) {
            return Err(format!("duplicate site_number {}", site.site_number));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn site(number: &str) -> Site {
        Site {
            site_number: number.to_string(),
            location: "San Jose, CA".to_string(),
            gateway: Some("Q2MX-0001".to_string()),
            switch: Some("Q2MS-0001".to_string()),
            access_point: Some("  ".to_string()),
            camera: None,
            management_vlan: 11,
            switch_ip: Some(Ipv4Addr::new(10, 1, 1, 2)),
            access_point_ip: None,
            address: None,
        }
    }

    #[test]
    fn test_network_name() {
        assert_eq!(site("1").network_name(), "San Jose - CA");
    }

    #[test]
    fn test_devices_skip_blank_serials() {
        assert_eq!(
            site("1").devices(),
            vec![
                ("Q2MX-0001".to_string(), DeviceRole::Gateway),
                ("Q2MS-0001".to_string(), DeviceRole::Switch),
            ]
        );
    }

    #[test]
    fn test_map_address_falls_back_to_location() {
        let mut s = site("1");
        assert_eq!(s.map_address(), "San Jose, CA");
        s.address = Some("500 Terry A Francois Blvd".to_string());
        assert_eq!(s.map_address(), "500 Terry A Francois Blvd");
    }

    #[test]
    fn test_validate_duplicates() {
        let err = validate_sites(&[site("1"), site("1")]).unwrap_err();
        assert!(err.contains("duplicate"));
        assert!(validate_sites(&[site("1"), site("2")]).is_ok());
    }

    #[test]
    fn test_load_inventory() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"site_number":"1","location":"Austin, TX","switch":"Q2MS-1","management_vlan":11,"switch_ip":"10.1.1.2"}}]"#
        )
        .unwrap();

        let sites = load_inventory(file.path()).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].switch_ip, Some(Ipv4Addr::new(10, 1, 1, 2)));
        assert_eq!(sites[0].devices().len(), 1);
    }

    #[test]
    fn test_load_inventory_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "site,location\n1,Austin").unwrap();
        assert!(matches!(
            load_inventory(file.path()),
            Err(ProvisionError::Inventory { .. })
        ));
    }
}
