//! In-memory dashboard controller.
//!
//! Applies the side effects of the actions it understands (network creation
//! and device claims) so that later phases observe them, and lets tests
//! script batch failures by resource path.

use async_trait::async_trait;
use fleet_dashboard::{
    Action, ActionBatch, ActionBatchApi, BatchStatus, BlinkRequest, CreatedResource,
    DashboardError, DashboardResult, Network, NetworkApi, NewActionBatch, NewNetwork, Operation,
    Organization, MAX_ACTIONS_PER_BATCH,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Organization every fake dashboard exposes by default.
pub const FAKE_ORG: &str = "549236";

#[derive(Debug, Clone)]
struct FailureRule {
    resource_contains: String,
    errors: Vec<String>,
    /// Remaining failures; `None` fails forever
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct State {
    organizations: Vec<Organization>,
    networks: Vec<Network>,
    batches: Vec<ActionBatch>,
    submissions: Vec<NewActionBatch>,
    failures: Vec<FailureRule>,
    polls_before_complete: u32,
    poll_counts: HashMap<String, u32>,
    claimed: HashMap<String, Vec<String>>,
    vlans_enabled: Vec<String>,
    deleted: Vec<String>,
    blinked: Vec<(String, String, BlinkRequest)>,
    rejection: Option<(u16, String)>,
    omit_org_in_submit: bool,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    fn add_network(&mut self, org: &str, name: &str, tags: Option<String>) -> Network {
        let network = Network {
            id: self.next_id("N"),
            name: name.to_string(),
            organization_id: Some(org.to_string()),
            tags,
        };
        self.networks.push(network.clone());
        network
    }

    /// Errors of the first rule matching any action, consuming one use.
    fn scripted_failure(&mut self, actions: &[Action]) -> Option<Vec<String>> {
        let position = self.failures.iter().position(|rule| {
            actions
                .iter()
                .any(|a| a.resource().contains(&rule.resource_contains))
        })?;
        let rule = &mut self.failures[position];
        let errors = rule.errors.clone();
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.failures.remove(position);
            }
        }
        Some(errors)
    }

    fn apply(&mut self, org: &str, actions: &[Action]) -> Vec<CreatedResource> {
        let mut created = Vec::new();
        for action in actions {
            let resource = action.resource();
            match action.operation() {
                Operation::Create if resource.ends_with("/networks") => {
                    let name = action.body()["name"].as_str().unwrap_or_default();
                    let tags = action.body()["tags"].as_str().map(str::to_string);
                    let network = self.add_network(org, name, tags);
                    created.push(CreatedResource {
                        uri: format!("/networks/{}", network.id),
                        id: network.id,
                    });
                }
                Operation::Claim => {
                    let network_id = resource
                        .trim_start_matches("/networks/")
                        .trim_end_matches("/devices")
                        .to_string();
                    let serial = action.body()["serial"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    self.claimed.entry(network_id).or_default().push(serial);
                }
                _ => {}
            }
        }
        created
    }
}

/// Dashboard controller held entirely in memory.
#[derive(Debug)]
pub struct FakeDashboard {
    state: Mutex<State>,
}

impl Default for FakeDashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDashboard {
    /// Creates a controller exposing [`FAKE_ORG`] and no networks.
    pub fn new() -> Self {
        let state = State {
            organizations: vec![Organization {
                id: FAKE_ORG.to_string(),
                name: "Fleet Test".to_string(),
            }],
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a network that exists before provisioning starts.
    pub fn with_network(self, name: &str) -> Self {
        self.state().add_network(FAKE_ORG, name, None);
        self
    }

    /// Fails every batch containing an action whose resource contains
    /// `resource_contains`.
    pub fn fail_matching(self, resource_contains: &str, errors: &[&str]) -> Self {
        self.push_failure(resource_contains, errors, None);
        self
    }

    /// Like [`fail_matching`](Self::fail_matching), but only `times` times.
    pub fn fail_matching_times(self, resource_contains: &str, errors: &[&str], times: u32) -> Self {
        self.push_failure(resource_contains, errors, Some(times));
        self
    }

    /// Asynchronous batches stay pending for `polls` fetches.
    pub fn with_async_polls(self, polls: u32) -> Self {
        self.state().polls_before_complete = polls;
        self
    }

    /// Submit responses leave `organizationId` empty.
    pub fn without_org_echo(self) -> Self {
        self.state().omit_org_in_submit = true;
        self
    }

    /// Rejects every later submission with HTTP `status` and `body`.
    pub fn fail_submit_with(&self, status: u16, body: &str) {
        self.state().rejection = Some((status, body.to_string()));
    }

    fn push_failure(&self, resource_contains: &str, errors: &[&str], remaining: Option<u32>) {
        self.state().failures.push(FailureRule {
            resource_contains: resource_contains.to_string(),
            errors: errors.iter().map(|e| e.to_string()).collect(),
            remaining,
        });
    }

    /// Drops all scripted failures.
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every submitted batch body, in submission order.
    pub fn submissions(&self) -> Vec<NewActionBatch> {
        self.state().submissions.clone()
    }

    /// Submitted actions whose resource contains `resource_contains`.
    pub fn submitted_actions(&self, resource_contains: &str) -> Vec<Action> {
        self.state()
            .submissions
            .iter()
            .flat_map(|b| b.actions.iter())
            .filter(|a| a.resource().contains(resource_contains))
            .cloned()
            .collect()
    }

    /// Current networks.
    pub fn networks(&self) -> Vec<Network> {
        self.state().networks.clone()
    }

    /// Id of the network named `name`.
    pub fn network_id(&self, name: &str) -> Option<String> {
        self.state()
            .networks
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.id.clone())
    }

    /// Removes a network behind the provisioner's back.
    pub fn forget_network(&self, name: &str) {
        self.state().networks.retain(|n| n.name != name);
    }

    /// Serials claimed into `network_id`.
    pub fn claimed(&self, network_id: &str) -> Vec<String> {
        self.state()
            .claimed
            .get(network_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Networks that had VLANs enabled.
    pub fn vlans_enabled(&self) -> Vec<String> {
        self.state().vlans_enabled.clone()
    }

    /// Network ids deleted successfully.
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    /// `(network_id, serial, request)` per blink call.
    pub fn blinked(&self) -> Vec<(String, String, BlinkRequest)> {
        self.state().blinked.clone()
    }
}

#[async_trait]
impl ActionBatchApi for FakeDashboard {
    async fn submit_batch(&self, org: &str, batch: &NewActionBatch) -> DashboardResult<ActionBatch> {
        if batch.len() > MAX_ACTIONS_PER_BATCH {
            return Err(DashboardError::rejection(
                400,
                format!("batch has {} actions", batch.len()),
            ));
        }

        let mut state = self.state();
        if let Some((status, body)) = &state.rejection {
            return Err(DashboardError::rejection(*status, body.clone()));
        }
        state.submissions.push(batch.clone());
        let id = state.next_id("B");

        let status = match state.scripted_failure(&batch.actions) {
            Some(errors) => BatchStatus {
                completed: false,
                failed: true,
                errors,
                created_resources: Vec::new(),
            },
            None => BatchStatus {
                completed: batch.synchronous || state.polls_before_complete == 0,
                failed: false,
                errors: Vec::new(),
                created_resources: state.apply(org, &batch.actions),
            },
        };

        let submitted = ActionBatch {
            id,
            organization_id: org.to_string(),
            confirmed: batch.confirmed,
            synchronous: batch.synchronous,
            actions: batch.actions.clone(),
            status,
        };
        state.batches.push(submitted.clone());
        if state.omit_org_in_submit {
            return Ok(ActionBatch {
                organization_id: String::new(),
                ..submitted
            });
        }
        Ok(submitted)
    }

    async fn get_batch(&self, org: &str, batch_id: &str) -> DashboardResult<ActionBatch> {
        let mut state = self.state();
        if !state
            .batches
            .iter()
            .any(|b| b.id == batch_id && b.organization_id == org)
        {
            return Err(DashboardError::not_found(format!(
                "/organizations/{}/actionBatches/{}",
                org, batch_id
            )));
        }
        let threshold = state.polls_before_complete;
        let polls = {
            let count = state.poll_counts.entry(batch_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let batch = state
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or_else(|| DashboardError::not_found(format!("actionBatches/{}", batch_id)))?;
        if !batch.status.failed && polls >= threshold {
            batch.status.completed = true;
        }
        Ok(batch.clone())
    }

    async fn list_batches(&self, _org: &str) -> DashboardResult<Vec<ActionBatch>> {
        Ok(self.state().batches.clone())
    }

    async fn cancel_batch(&self, _org: &str, batch_id: &str) -> DashboardResult<()> {
        let mut state = self.state();
        let before = state.batches.len();
        state.batches.retain(|b| b.id != batch_id);
        if state.batches.len() == before {
            return Err(DashboardError::not_found(format!("actionBatches/{}", batch_id)));
        }
        Ok(())
    }

    async fn confirm_batch(&self, _org: &str, batch_id: &str) -> DashboardResult<ActionBatch> {
        let mut state = self.state();
        let batch = state
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or_else(|| DashboardError::not_found(format!("actionBatches/{}", batch_id)))?;
        batch.confirmed = true;
        Ok(batch.clone())
    }
}

#[async_trait]
impl NetworkApi for FakeDashboard {
    async fn list_organizations(&self) -> DashboardResult<Vec<Organization>> {
        Ok(self.state().organizations.clone())
    }

    async fn list_networks(&self, org: &str) -> DashboardResult<Vec<Network>> {
        Ok(self
            .state()
            .networks
            .iter()
            .filter(|n| n.organization_id.as_deref() == Some(org))
            .cloned()
            .collect())
    }

    async fn create_network(&self, org: &str, network: &NewNetwork) -> DashboardResult<Network> {
        let mut state = self.state();
        if state.networks.iter().any(|n| n.name == network.name) {
            return Err(DashboardError::rejection(
                400,
                format!("network name {} already taken", network.name),
            ));
        }
        Ok(state.add_network(org, &network.name, Some(network.tags.clone())))
    }

    async fn set_vlans_enabled(&self, network_id: &str, enabled: bool) -> DashboardResult<()> {
        let mut state = self.state();
        if !state.networks.iter().any(|n| n.id == network_id) {
            return Err(DashboardError::not_found(format!("networks/{}", network_id)));
        }
        if enabled {
            state.vlans_enabled.push(network_id.to_string());
        }
        Ok(())
    }

    async fn delete_network(&self, network_id: &str) -> DashboardResult<()> {
        let mut state = self.state();
        let before = state.networks.len();
        state.networks.retain(|n| n.id != network_id);
        if state.networks.len() == before {
            return Err(DashboardError::not_found(format!("networks/{}", network_id)));
        }
        state.deleted.push(network_id.to_string());
        Ok(())
    }

    async fn blink_device(
        &self,
        network_id: &str,
        serial: &str,
        request: &BlinkRequest,
    ) -> DashboardResult<()> {
        self.state()
            .blinked
            .push((network_id.to_string(), serial.to_string(), *request));
        Ok(())
    }
}
