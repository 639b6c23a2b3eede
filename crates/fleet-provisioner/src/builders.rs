//! Action builders
//!
//! Turn inventory rows and ledger records into ordered [`ActionSpec`] lists
//! for each phase. Builders never touch the network or the ledger; given the
//! same inputs and the same `tag_seed` they produce the same actions.

use fleet_dashboard::NewNetwork;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::net::Ipv4Addr;

use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::inventory::{DeviceRole, Site};
use crate::ledger::ProvisioningRecord;
use crate::payload::{
    group_policy_catalog, ActionSpec, ClaimDevice, DeviceAttributes, ManagementInterface,
    PortMode, StaticUplink, SwitchPort, Vlan,
};
use crate::phase::Phase;

/// Tags always available to the sampler
pub const BUILTIN_TAGS: [&str; 6] = ["foo", "bar", "foobar", "spam", "ham", "eggs"];

/// Number of tags applied to each tagged entity
pub const TAGS_PER_ENTITY: usize = 3;

/// Subnet mask of every site subnet
pub const SITE_SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// VLAN plan entries as (subnet index, name)
const VLAN_PLAN: [(u8, &str); 4] = [(1, "Management"), (2, "Data"), (3, "Voice"), (4, "Guest")];

/// Configured switch ports as (port, description, mode). Access ports get a
/// client VLAN just above the management VLAN.
const SWITCH_PORTS: [(u8, &str, PortMode); 5] = [
    (1, "Uplink to MX", PortMode::Trunk),
    (3, "MR wireless AP", PortMode::Trunk),
    (5, "MV security camera", PortMode::Trunk),
    (7, "ready to connect!", PortMode::Access),
    (9, "SFP port", PortMode::Trunk),
];

/// Whether the Settings phase also creates the VLAN plan and group policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettingsMode {
    /// First configuration of a site
    #[default]
    Initial,
    /// Re-apply device, uplink and port settings to configured sites
    Resync,
}

impl SettingsMode {
    /// Returns true if VLANs and group policies are part of the payload.
    pub fn includes_network_plan(&self) -> bool {
        matches!(self, SettingsMode::Initial)
    }
}

/// Inputs shared by every site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Organization owning the networks
    pub organization_id: String,
    /// Product types of created networks
    pub network_type: String,
    /// Time zone of created networks
    pub time_zone: String,
    /// Written into device notes
    pub operator_name: String,
    /// Operator-supplied tags
    pub custom_tags: Vec<String>,
    /// Fixed sampling seed
    pub tag_seed: Option<u64>,
    /// DNS servers for management uplinks
    pub dns_servers: Vec<Ipv4Addr>,
}

impl BuildContext {
    /// Derives the context from validated configuration.
    pub fn from_config(config: &ProvisionerConfig) -> Self {
        Self {
            organization_id: config.dashboard.organization_id.clone(),
            network_type: config.provisioning.network_type.clone(),
            time_zone: config.provisioning.time_zone.clone(),
            operator_name: config.provisioning.operator_name.clone(),
            custom_tags: config.provisioning.custom_tags.clone(),
            tag_seed: config.provisioning.tag_seed,
            dns_servers: config.provisioning.dns_servers.clone(),
        }
    }

    /// Random source for one site in one phase.
    ///
    /// With a seed configured the stream depends only on the seed, the site
    /// number and the phase, never on processing order.
    pub fn rng(&self, site_number: &str, phase: Phase) -> StdRng {
        match self.tag_seed {
            Some(seed) => StdRng::seed_from_u64(derive_seed(seed, site_number, phase)),
            None => StdRng::from_entropy(),
        }
    }

    /// Samples the space-separated tag string for one entity.
    pub fn sample_tags(&self, rng: &mut StdRng) -> String {
        let pool: Vec<&str> = self
            .custom_tags
            .iter()
            .map(String::as_str)
            .chain(BUILTIN_TAGS)
            .collect();
        pool.choose_multiple(rng, TAGS_PER_ENTITY)
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// FNV-1a over site number and phase, keyed by the configured seed.
fn derive_seed(seed: u64, site_number: &str, phase: Phase) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ seed;
    for byte in site_number
        .bytes()
        .chain(std::iter::once(b'/'))
        .chain(phase.as_str().bytes())
    {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Per-phase action construction.
pub trait ActionBuilders: Send + Sync {
    /// Network creation for each site, copying the template network.
    fn network_actions(
        &self,
        ctx: &BuildContext,
        sites: &[&Site],
        template_network_id: &str,
    ) -> ProvisionResult<Vec<ActionSpec>>;

    /// Device claims for one site.
    fn claim_actions(
        &self,
        ctx: &BuildContext,
        site: &Site,
        network_id: &str,
    ) -> ProvisionResult<Vec<ActionSpec>>;

    /// Device, uplink, VLAN, group policy and switch port configuration for one site.
    fn settings_actions(
        &self,
        ctx: &BuildContext,
        site: &Site,
        record: &ProvisioningRecord,
        mode: SettingsMode,
    ) -> ProvisionResult<Vec<ActionSpec>>;
}

/// Builders producing the standard branch-site layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardBuilders;

impl ActionBuilders for StandardBuilders {
    fn network_actions(
        &self,
        ctx: &BuildContext,
        sites: &[&Site],
        template_network_id: &str,
    ) -> ProvisionResult<Vec<ActionSpec>> {
        Ok(sites
            .iter()
            .map(|site| {
                let mut rng = ctx.rng(&site.site_number, Phase::Networks);
                ActionSpec::CreateNetwork {
                    organization_id: ctx.organization_id.clone(),
                    body: NewNetwork {
                        name: site.network_name(),
                        network_type: ctx.network_type.clone(),
                        tags: ctx.sample_tags(&mut rng),
                        time_zone: ctx.time_zone.clone(),
                        copy_from_network_id: Some(template_network_id.to_string()),
                    },
                }
            })
            .collect())
    }

    fn claim_actions(
        &self,
        _ctx: &BuildContext,
        site: &Site,
        network_id: &str,
    ) -> ProvisionResult<Vec<ActionSpec>> {
        Ok(site
            .devices()
            .into_iter()
            .map(|(serial, _)| ActionSpec::ClaimDevice {
                network_id: network_id.to_string(),
                body: ClaimDevice { serial },
            })
            .collect())
    }

    fn settings_actions(
        &self,
        ctx: &BuildContext,
        site: &Site,
        record: &ProvisioningRecord,
        mode: SettingsMode,
    ) -> ProvisionResult<Vec<ActionSpec>> {
        let network_id = record.network_id.as_deref().ok_or_else(|| {
            ProvisionError::precondition(
                Phase::Settings,
                format!("site {} has no network recorded", site.site_number),
            )
        })?;
        let devices = record.devices.as_deref().ok_or_else(|| {
            ProvisionError::precondition(
                Phase::Settings,
                format!("site {} has no devices recorded", site.site_number),
            )
        })?;
        let mgmt_vlan = record.management_vlan.unwrap_or(site.management_vlan);
        if !(1..=4094).contains(&mgmt_vlan) {
            return Err(ProvisionError::invalid_site(
                &site.site_number,
                format!("management VLAN {} is out of range", mgmt_vlan),
            ));
        }

        let mut rng = ctx.rng(&site.site_number, Phase::Settings);
        let mut actions = Vec::new();

        for device in devices {
            actions.push(ActionSpec::UpdateDevice {
                network_id: network_id.to_string(),
                serial: device.serial.clone(),
                body: DeviceAttributes {
                    name: device.role.description().to_string(),
                    tags: ctx.sample_tags(&mut rng),
                    address: site.map_address().to_string(),
                    move_map_marker: true,
                    notes: format!("installed by {}", ctx.operator_name),
                },
            });
        }

        for role in [DeviceRole::Switch, DeviceRole::AccessPoint] {
            if let (Some(serial), Some(ip)) = (record.serial(role), site.management_ip(role)) {
                // Only the switch uplink is tagged.
                let vlan = (role == DeviceRole::Switch).then_some(mgmt_vlan);
                actions.push(ActionSpec::UpdateManagementInterface {
                    network_id: network_id.to_string(),
                    serial: serial.to_string(),
                    body: ManagementInterface {
                        wan1: StaticUplink {
                            using_static_ip: true,
                            vlan,
                            static_ip: ip,
                            static_gateway_ip: gateway_for(ip),
                            static_subnet_mask: SITE_SUBNET_MASK,
                            static_dns: ctx.dns_servers.clone(),
                        },
                    },
                });
            }
        }

        if mode.includes_network_plan() {
            actions.extend(vlan_actions(site, network_id)?);
            actions.extend(group_policy_actions(site, network_id)?);
        }

        if let Some(switch) = record.serial(DeviceRole::Switch) {
            for (port, name, mode) in SWITCH_PORTS {
                let vlan = match mode {
                    PortMode::Trunk => mgmt_vlan,
                    PortMode::Access => {
                        rng.gen_range(mgmt_vlan.saturating_add(1)..=mgmt_vlan.saturating_add(3))
                    }
                };
                actions.push(ActionSpec::UpdateSwitchPort {
                    serial: switch.to_string(),
                    port,
                    body: SwitchPort {
                        name: name.to_string(),
                        mode,
                        vlan,
                        tags: ctx.sample_tags(&mut rng),
                    },
                });
            }
        }

        Ok(actions)
    }
}

/// Host `.1` of the address's /24.
pub fn gateway_for(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 1)
}

/// VLAN 1 handling plus the site VLAN plan.
///
/// Site 0 keeps VLAN 1 as its management VLAN; every other site drops VLAN 1
/// and has no guest VLAN.
fn vlan_actions(site: &Site, network_id: &str) -> ProvisionResult<Vec<ActionSpec>> {
    let octet: u8 = site.site_number.parse().map_err(|_| {
        ProvisionError::invalid_site(
            &site.site_number,
            "site number must be 0-255 to address its subnets",
        )
    })?;
    let is_hub = octet == 0;
    let mut actions = Vec::new();

    if is_hub {
        actions.push(ActionSpec::UpdateVlan {
            network_id: network_id.to_string(),
            vlan_id: 1,
            body: site_vlan(site, octet, 1, "Management", None),
        });
    } else {
        actions.push(ActionSpec::DestroyVlan {
            network_id: network_id.to_string(),
            vlan_id: 1,
        });
    }

    for (index, name) in VLAN_PLAN {
        if (is_hub && index == 1) || (!is_hub && index == 4) {
            continue;
        }
        let vlan_id: u16 = format!("{}{}", site.site_number, index)
            .parse()
            .map_err(|_| {
                ProvisionError::invalid_site(&site.site_number, "VLAN id does not fit")
            })?;
        actions.push(ActionSpec::CreateVlan {
            network_id: network_id.to_string(),
            body: site_vlan(site, octet, index, name, Some(vlan_id)),
        });
    }

    Ok(actions)
}

fn site_vlan(site: &Site, octet: u8, index: u8, name: &str, id: Option<u16>) -> Vlan {
    Vlan {
        id: id.map(|id| id.to_string()),
        name: format!("Site {} - {}", site.site_number, name),
        subnet: format!("10.{}.{}.0/24", octet, index),
        appliance_ip: Ipv4Addr::new(10, octet, index, 1),
    }
}

fn group_policy_actions(site: &Site, network_id: &str) -> ProvisionResult<Vec<ActionSpec>> {
    let catalog = group_policy_catalog().map_err(|e| {
        ProvisionError::invalid_site(&site.site_number, format!("group policy catalog: {}", e))
    })?;
    Ok(catalog
        .into_iter()
        .map(|body| ActionSpec::CreateGroupPolicy {
            network_id: network_id.to_string(),
            body,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DeviceEntry;
    use fleet_dashboard::Operation;
    use pretty_assertions::assert_eq;

    fn ctx(seed: Option<u64>) -> BuildContext {
        BuildContext {
            organization_id: "549236".to_string(),
            network_type: "appliance switch".to_string(),
            time_zone: "America/Los_Angeles".to_string(),
            operator_name: "Alex".to_string(),
            custom_tags: vec!["west".to_string()],
            tag_seed: seed,
            dns_servers: vec![Ipv4Addr::new(208, 67, 220, 220)],
        }
    }

    fn site(number: &str) -> Site {
        Site {
            site_number: number.to_string(),
            location: "Austin, TX".to_string(),
            gateway: Some("Q2MX-1".to_string()),
            switch: Some("Q2MS-1".to_string()),
            access_point: Some("Q2MR-1".to_string()),
            camera: None,
            management_vlan: 11,
            switch_ip: Some(Ipv4Addr::new(10, 1, 1, 2)),
            access_point_ip: Some(Ipv4Addr::new(10, 1, 1, 3)),
            address: None,
        }
    }

    fn record(site: &Site) -> ProvisioningRecord {
        let mut record = ProvisioningRecord::for_network(site, "N_1");
        record.devices = Some(
            site.devices()
                .into_iter()
                .map(|(serial, role)| DeviceEntry { serial, role })
                .collect(),
        );
        record.management_vlan = Some(site.management_vlan);
        record
    }

    fn resources(actions: &[ActionSpec]) -> Vec<String> {
        actions
            .iter()
            .map(|a| format!("{} {}", a.operation(), a.resource()))
            .collect()
    }

    #[test]
    fn test_network_actions_copy_template() {
        let s = site("1");
        let actions = StandardBuilders
            .network_actions(&ctx(Some(1)), &[&s], "N_TEMPLATE")
            .unwrap();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ActionSpec::CreateNetwork { body, .. } => {
                assert_eq!(body.name, "Austin - TX");
                assert_eq!(body.copy_from_network_id.as_deref(), Some("N_TEMPLATE"));
                assert_eq!(body.tags.split(' ').count(), TAGS_PER_ENTITY);
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(actions[0].resource(), "/organizations/549236/networks");
    }

    #[test]
    fn test_claim_actions_per_device() {
        let actions = StandardBuilders
            .claim_actions(&ctx(None), &site("1"), "N_1")
            .unwrap();
        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|a| a.operation() == Operation::Claim));
        assert_eq!(actions[0].resource(), "/networks/N_1/devices");
    }

    #[test]
    fn test_settings_deterministic_with_seed() {
        let s = site("1");
        let r = record(&s);
        let first = StandardBuilders
            .settings_actions(&ctx(Some(42)), &s, &r, SettingsMode::Initial)
            .unwrap();
        let second = StandardBuilders
            .settings_actions(&ctx(Some(42)), &s, &r, SettingsMode::Initial)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_seed_is_per_site_and_phase() {
        let c = ctx(Some(42));
        assert_ne!(
            derive_seed(42, "1", Phase::Settings),
            derive_seed(42, "2", Phase::Settings)
        );
        assert_ne!(
            derive_seed(42, "1", Phase::Networks),
            derive_seed(42, "1", Phase::Settings)
        );
        let a = c.sample_tags(&mut c.rng("1", Phase::Networks));
        let b = c.sample_tags(&mut c.rng("1", Phase::Networks));
        assert_eq!(a, b);
    }

    #[test]
    fn test_settings_layout_for_branch_site() {
        let s = site("1");
        let actions = StandardBuilders
            .settings_actions(&ctx(Some(7)), &s, &record(&s), SettingsMode::Initial)
            .unwrap();
        let lines = resources(&actions);

        assert_eq!(lines[0], "update /networks/N_1/devices/Q2MX-1");
        assert!(lines.contains(&"update /networks/N_1/devices/Q2MS-1/managementInterfaceSettings".to_string()));
        assert!(lines.contains(&"destroy /networks/N_1/vlans/1".to_string()));
        assert_eq!(
            lines.iter().filter(|l| l.starts_with("create /networks/N_1/vlans")).count(),
            3
        );
        assert_eq!(
            lines.iter().filter(|l| l.contains("groupPolicies")).count(),
            5
        );
        assert_eq!(
            lines.iter().filter(|l| l.contains("switchPorts")).count(),
            5
        );
        // Ports come after the VLANs they reference.
        let last_vlan = lines.iter().rposition(|l| l.contains("/vlans")).unwrap();
        let first_port = lines.iter().position(|l| l.contains("switchPorts")).unwrap();
        assert!(last_vlan < first_port);

        let vlan_ids: Vec<Option<String>> = actions
            .iter()
            .filter_map(|a| match a {
                ActionSpec::CreateVlan { body, .. } => Some(body.id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            vlan_ids,
            vec![Some("11".to_string()), Some("12".to_string()), Some("13".to_string())]
        );
    }

    #[test]
    fn test_hub_site_keeps_vlan_one() {
        let mut s = site("0");
        s.management_vlan = 1;
        let actions = StandardBuilders
            .settings_actions(&ctx(Some(7)), &s, &record(&s), SettingsMode::Initial)
            .unwrap();
        let vlans: Vec<&ActionSpec> = actions
            .iter()
            .filter(|a| a.resource().contains("/vlans"))
            .collect();
        assert_eq!(vlans[0].operation(), Operation::Update);
        match vlans[0] {
            ActionSpec::UpdateVlan { body, .. } => {
                assert_eq!(body.name, "Site 0 - Management");
                assert_eq!(body.subnet, "10.0.1.0/24");
            }
            other => panic!("unexpected action {:?}", other),
        }
        // Data, Voice and Guest; no Management create.
        assert_eq!(vlans.len(), 4);
    }

    #[test]
    fn test_resync_omits_network_plan() {
        let s = site("1");
        let mut r = record(&s);
        r.settings_created = true;
        let lines = resources(
            &StandardBuilders
                .settings_actions(&ctx(None), &s, &r, SettingsMode::Resync)
                .unwrap(),
        );
        assert!(!lines.iter().any(|l| l.contains("/vlans")));
        assert!(!lines.iter().any(|l| l.contains("groupPolicies")));
        assert!(lines.iter().any(|l| l.contains("switchPorts")));
    }

    #[test]
    fn test_access_port_vlan_in_range() {
        let s = site("1");
        for seed in 0..20 {
            let actions = StandardBuilders
                .settings_actions(&ctx(Some(seed)), &s, &record(&s), SettingsMode::Resync)
                .unwrap();
            let vlan = actions
                .iter()
                .find_map(|a| match a {
                    ActionSpec::UpdateSwitchPort { port: 7, body, .. } => Some(body.vlan),
                    _ => None,
                })
                .unwrap();
            assert!((12..=14).contains(&vlan));
        }
    }

    #[test]
    fn test_non_numeric_site_is_invalid() {
        let s = site("north");
        let err = StandardBuilders
            .settings_actions(&ctx(None), &s, &record(&s), SettingsMode::Initial)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidSite { .. }));
    }

    #[test]
    fn test_vlan_ids_stay_in_range() {
        let s = site("410");
        let err = StandardBuilders
            .settings_actions(&ctx(None), &s, &record(&s), SettingsMode::Initial)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidSite { .. }));

        let s = site("255");
        let created: Vec<u16> = StandardBuilders
            .settings_actions(&ctx(Some(1)), &s, &record(&s), SettingsMode::Initial)
            .unwrap()
            .into_iter()
            .filter_map(|a| match a {
                ActionSpec::CreateVlan { body, .. } => body.id.and_then(|id| id.parse().ok()),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec![2551, 2552, 2553]);
    }

    #[test]
    fn test_settings_requires_devices() {
        let s = site("1");
        let r = ProvisioningRecord::for_network(&s, "N_1");
        let err = StandardBuilders
            .settings_actions(&ctx(None), &s, &r, SettingsMode::Initial)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PreconditionNotMet { .. }));
    }

    #[test]
    fn test_gateway_for() {
        assert_eq!(gateway_for(Ipv4Addr::new(10, 4, 1, 2)), Ipv4Addr::new(10, 4, 1, 1));
    }
}
