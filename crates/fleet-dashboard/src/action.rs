//! Atomic remote mutations and batch splitting.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{DashboardError, DashboardResult};

/// Per-batch action cap enforced by the dashboard.
pub const MAX_ACTIONS_PER_BATCH: usize = 100;

/// Mutation applied by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create a new entity in a collection
    Create,
    /// Update an existing entity
    Update,
    /// Delete an existing entity
    Destroy,
    /// Claim a device into a network
    Claim,
}

impl Operation {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Destroy => "destroy",
            Operation::Claim => "claim",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic remote mutation.
///
/// Actions are immutable once built. The body is the generic wire form;
/// typed payloads are converted into it at the serialization boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    resource: String,
    operation: Operation,
    #[serde(default)]
    body: Value,
}

impl Action {
    /// Creates an action.
    pub fn new(resource: impl Into<String>, operation: Operation, body: Value) -> Self {
        Self {
            resource: resource.into(),
            operation,
            body,
        }
    }

    /// Path of the target collection or instance.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The mutation to apply.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Wire payload.
    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.resource)
    }
}

/// Splits an ordered action list into chunks of at most `cap` actions.
///
/// Chunks are contiguous and keep the original order, so an action never
/// lands in an earlier chunk than anything it follows.
pub fn split_actions(actions: Vec<Action>, cap: usize) -> DashboardResult<Vec<Vec<Action>>> {
    if cap == 0 || cap > MAX_ACTIONS_PER_BATCH {
        return Err(DashboardError::invalid_request(format!(
            "batch cap must be between 1 and {}, got {}",
            MAX_ACTIONS_PER_BATCH, cap
        )));
    }

    let mut chunks = Vec::with_capacity(actions.len().div_ceil(cap));
    let mut current = Vec::with_capacity(cap.min(actions.len()));
    for action in actions {
        if current.len() == cap {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(cap)));
        }
        current.push(action);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn numbered(n: usize) -> Vec<Action> {
        (0..n)
            .map(|i| {
                Action::new(
                    format!("/networks/N_1/vlans/{}", i),
                    Operation::Update,
                    json!({ "seq": i }),
                )
            })
            .collect()
    }

    #[test]
    fn test_operation_wire_names() {
        assert_eq!(serde_json::to_value(Operation::Claim).unwrap(), json!("claim"));
        assert_eq!(Operation::Destroy.to_string(), "destroy");
        let op: Operation = serde_json::from_value(json!("create")).unwrap();
        assert_eq!(op, Operation::Create);
    }

    #[test]
    fn test_action_serialization() {
        let action = Action::new(
            "/networks/N_1/devices",
            Operation::Claim,
            json!({ "serial": "Q2XX-AAAA-0001" }),
        );
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({
                "resource": "/networks/N_1/devices",
                "operation": "claim",
                "body": { "serial": "Q2XX-AAAA-0001" }
            })
        );
        assert_eq!(action.to_string(), "claim /networks/N_1/devices");
    }

    #[test]
    fn test_split_under_cap_is_single_chunk() {
        let chunks = split_actions(numbered(7), 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 7);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_actions(Vec::new(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_split_respects_cap_and_order() {
        for (n, cap) in [(250, 100), (100, 100), (101, 100), (9, 2), (17, 1)] {
            let chunks = split_actions(numbered(n), cap).unwrap();
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= cap));

            let flattened: Vec<u64> = chunks
                .iter()
                .flatten()
                .map(|a| a.body()["seq"].as_u64().unwrap())
                .collect();
            let expected: Vec<u64> = (0..n as u64).collect();
            assert_eq!(flattened, expected, "n={} cap={}", n, cap);
        }
    }

    #[test]
    fn test_split_rejects_bad_cap() {
        assert!(split_actions(numbered(3), 0).is_err());
        assert!(split_actions(numbered(3), MAX_ACTIONS_PER_BATCH + 1).is_err());
    }
}
