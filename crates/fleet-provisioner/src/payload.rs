//! Typed action payloads.
//!
//! Each action the provisioner emits is one [`ActionSpec`] variant keyed by
//! resource kind and operation, carrying its own body type. Conversion to
//! the untyped wire [`Action`] happens only at submission.

use fleet_dashboard::{Action, NewNetwork, Operation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::Ipv4Addr;

use crate::error::{ProvisionError, ProvisionResult};

/// Bundled group policy definitions.
const GROUP_POLICY_CATALOG: &str = include_str!("../data/group_policies.json");

/// Body of a device claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimDevice {
    /// Serial of the device to claim
    pub serial: String,
}

/// Body of a device attribute update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    /// Display name
    pub name: String,
    /// Space-separated tags
    pub tags: String,
    /// Street address shown on the map
    pub address: String,
    /// Moves the map marker to `address`
    pub move_map_marker: bool,
    /// Free-form notes
    pub notes: String,
}

/// Static addressing of a device uplink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticUplink {
    /// Static addressing instead of DHCP
    pub using_static_ip: bool,
    /// Untagged when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    /// Device address
    pub static_ip: Ipv4Addr,
    /// Default gateway
    pub static_gateway_ip: Ipv4Addr,
    /// Subnet mask
    pub static_subnet_mask: Ipv4Addr,
    /// DNS servers, in preference order
    pub static_dns: Vec<Ipv4Addr>,
}

/// Body of a management interface update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagementInterface {
    /// Primary uplink
    pub wan1: StaticUplink,
}

/// Body of a VLAN create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vlan {
    /// Only sent on create
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name
    pub name: String,
    /// Subnet in CIDR notation
    pub subnet: String,
    /// Gateway address of the appliance on this VLAN
    pub appliance_ip: Ipv4Addr,
}

/// A group policy definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPolicy {
    /// Policy name
    pub name: String,
    /// Policy sections, passed through as defined in the catalog
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// Switch port mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    /// Carries tagged VLANs
    Trunk,
    /// Single untagged VLAN
    Access,
}

/// Body of a switch port update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchPort {
    /// Port description
    pub name: String,
    /// Port mode
    #[serde(rename = "type")]
    pub mode: PortMode,
    /// Native VLAN for trunks, the only VLAN for access ports
    pub vlan: u16,
    /// Space-separated tags
    pub tags: String,
}

/// One provisioning action, typed by resource kind and operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    /// Create a network in an organization
    CreateNetwork {
        /// Owning organization
        organization_id: String,
        /// Network definition
        body: NewNetwork,
    },
    /// Claim a device into a network
    ClaimDevice {
        /// Target network
        network_id: String,
        /// Device to claim
        body: ClaimDevice,
    },
    /// Update a device's attributes
    UpdateDevice {
        /// Network holding the device
        network_id: String,
        /// Device serial
        serial: String,
        /// New attributes
        body: DeviceAttributes,
    },
    /// Set a device's management uplink addressing
    UpdateManagementInterface {
        /// Network holding the device
        network_id: String,
        /// Device serial
        serial: String,
        /// Uplink settings
        body: ManagementInterface,
    },
    /// Update an existing VLAN
    UpdateVlan {
        /// Network holding the VLAN
        network_id: String,
        /// VLAN to update
        vlan_id: u16,
        /// New VLAN settings
        body: Vlan,
    },
    /// Delete a VLAN
    DestroyVlan {
        /// Network holding the VLAN
        network_id: String,
        /// VLAN to delete
        vlan_id: u16,
    },
    /// Create a VLAN
    CreateVlan {
        /// Target network
        network_id: String,
        /// VLAN definition, including its id
        body: Vlan,
    },
    /// Create a group policy
    CreateGroupPolicy {
        /// Target network
        network_id: String,
        /// Policy definition
        body: GroupPolicy,
    },
    /// Configure one switch port
    UpdateSwitchPort {
        /// Switch serial
        serial: String,
        /// Port number
        port: u8,
        /// Port settings
        body: SwitchPort,
    },
}

impl ActionSpec {
    /// Resource path the action targets.
    pub fn resource(&self) -> String {
        match self {
            ActionSpec::CreateNetwork {
                organization_id, ..
            } => format!("/organizations/{}/networks", organization_id),
            ActionSpec::ClaimDevice { network_id, .. } => {
                format!("/networks/{}/devices", network_id)
            }
            ActionSpec::UpdateDevice {
                network_id, serial, ..
            } => format!("/networks/{}/devices/{}", network_id, serial),
            ActionSpec::UpdateManagementInterface {
                network_id, serial, ..
            } => format!(
                "/networks/{}/devices/{}/managementInterfaceSettings",
                network_id, serial
            ),
            ActionSpec::UpdateVlan {
                network_id,
                vlan_id,
                ..
            }
            | ActionSpec::DestroyVlan {
                network_id,
                vlan_id,
            } => format!("/networks/{}/vlans/{}", network_id, vlan_id),
            ActionSpec::CreateVlan { network_id, .. } => {
                format!("/networks/{}/vlans", network_id)
            }
            ActionSpec::CreateGroupPolicy { network_id, .. } => {
                format!("/networks/{}/groupPolicies", network_id)
            }
            ActionSpec::UpdateSwitchPort { serial, port, .. } => {
                format!("/devices/{}/switchPorts/{}", serial, port)
            }
        }
    }

    /// Operation performed on the resource.
    pub fn operation(&self) -> Operation {
        match self {
            ActionSpec::CreateNetwork { .. }
            | ActionSpec::CreateVlan { .. }
            | ActionSpec::CreateGroupPolicy { .. } => Operation::Create,
            ActionSpec::ClaimDevice { .. } => Operation::Claim,
            ActionSpec::DestroyVlan { .. } => Operation::Destroy,
            ActionSpec::UpdateDevice { .. }
            | ActionSpec::UpdateManagementInterface { .. }
            | ActionSpec::UpdateVlan { .. }
            | ActionSpec::UpdateSwitchPort { .. } => Operation::Update,
        }
    }

    fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            ActionSpec::CreateNetwork { body, .. } => serde_json::to_value(body),
            ActionSpec::ClaimDevice { body, .. } => serde_json::to_value(body),
            ActionSpec::UpdateDevice { body, .. } => serde_json::to_value(body),
            ActionSpec::UpdateManagementInterface { body, .. } => serde_json::to_value(body),
            ActionSpec::UpdateVlan { body, .. } | ActionSpec::CreateVlan { body, .. } => {
                serde_json::to_value(body)
            }
            ActionSpec::DestroyVlan { .. } => Ok(Value::Object(Map::new())),
            ActionSpec::CreateGroupPolicy { body, .. } => serde_json::to_value(body),
            ActionSpec::UpdateSwitchPort { body, .. } => serde_json::to_value(body),
        }
    }

    /// Converts to the wire action.
    pub fn to_action(&self) -> ProvisionResult<Action> {
        let resource = self.resource();
        let body = self.body().map_err(|e| ProvisionError::Payload {
            resource: resource.clone(),
            message: e.to_string(),
        })?;
        Ok(Action::new(resource, self.operation(), body))
    }
}

/// Converts a list of specs, preserving order.
pub fn to_actions(specs: &[ActionSpec]) -> ProvisionResult<Vec<Action>> {
    specs.iter().map(ActionSpec::to_action).collect()
}

/// Group policies from the bundled catalog, in creation order.
pub fn group_policy_catalog() -> Result<Vec<GroupPolicy>, serde_json::Error> {
    serde_json::from_str(GROUP_POLICY_CATALOG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_catalog_has_five_policies() {
        let names: Vec<String> = group_policy_catalog()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Employee", "Executive", "Guest", "Sales", "Support"]);
    }

    #[test]
    fn test_group_policy_flattens_settings() {
        let employee = group_policy_catalog().unwrap().remove(0);
        let action = ActionSpec::CreateGroupPolicy {
            network_id: "N_1".to_string(),
            body: employee,
        }
        .to_action()
        .unwrap();
        assert_eq!(action.resource(), "/networks/N_1/groupPolicies");
        assert_eq!(action.body()["name"], "Employee");
        assert_eq!(action.body()["bandwidth"]["bandwidthLimits"]["limitDown"], 10240);
    }

    #[test]
    fn test_destroy_vlan_has_empty_body() {
        let action = ActionSpec::DestroyVlan {
            network_id: "N_1".to_string(),
            vlan_id: 1,
        }
        .to_action()
        .unwrap();
        assert_eq!(action.resource(), "/networks/N_1/vlans/1");
        assert_eq!(action.operation(), Operation::Destroy);
        assert_eq!(action.body(), &json!({}));
    }

    #[test]
    fn test_untagged_uplink_omits_vlan() {
        let body = ManagementInterface {
            wan1: StaticUplink {
                using_static_ip: true,
                vlan: None,
                static_ip: Ipv4Addr::new(10, 1, 1, 3),
                static_gateway_ip: Ipv4Addr::new(10, 1, 1, 1),
                static_subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                static_dns: vec![Ipv4Addr::new(208, 67, 220, 220)],
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "wan1": {
                    "usingStaticIp": true,
                    "staticIp": "10.1.1.3",
                    "staticGatewayIp": "10.1.1.1",
                    "staticSubnetMask": "255.255.255.0",
                    "staticDns": ["208.67.220.220"]
                }
            })
        );
    }

    #[test]
    fn test_switch_port_wire_shape() {
        let action = ActionSpec::UpdateSwitchPort {
            serial: "Q2MS-1".to_string(),
            port: 7,
            body: SwitchPort {
                name: "ready to connect!".to_string(),
                mode: PortMode::Access,
                vlan: 13,
                tags: "foo bar spam".to_string(),
            },
        }
        .to_action()
        .unwrap();
        assert_eq!(action.resource(), "/devices/Q2MS-1/switchPorts/7");
        assert_eq!(
            action.body(),
            &json!({ "name": "ready to connect!", "type": "access", "vlan": 13, "tags": "foo bar spam" })
        );
    }
}
