//! Action batch wire model and status classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::action::Action;

/// Entity created by a batch, as reported in its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    /// Identifier assigned by the remote system
    pub id: String,
    /// Path of the created entity
    pub uri: String,
}

/// Aggregate status of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    /// All actions were applied
    #[serde(default)]
    pub completed: bool,
    /// The batch failed
    #[serde(default)]
    pub failed: bool,
    /// Error descriptions, in the order reported
    #[serde(default)]
    pub errors: Vec<String>,
    /// Entities created by the batch
    #[serde(default)]
    pub created_resources: Vec<CreatedResource>,
}

/// Classification of a single status observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    /// Neither terminal flag is set yet
    Pending,
    /// Completed without failure
    Completed,
    /// Failed (takes precedence over `completed`)
    Failed,
}

impl BatchState {
    /// Returns true if no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchState::Pending)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Pending => write!(f, "pending"),
            BatchState::Completed => write!(f, "completed"),
            BatchState::Failed => write!(f, "failed"),
        }
    }
}

impl BatchStatus {
    /// Classifies this observation.
    ///
    /// A status carrying both flags is treated as failed.
    pub fn state(&self) -> BatchState {
        if self.failed {
            BatchState::Failed
        } else if self.completed {
            BatchState::Completed
        } else {
            BatchState::Pending
        }
    }

    /// Created entities keyed by resource path.
    pub fn created_resource_map(&self) -> BTreeMap<String, String> {
        self.created_resources
            .iter()
            .map(|r| (r.uri.clone(), r.id.clone()))
            .collect()
    }
}

/// A submitted batch as returned by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionBatch {
    /// Identifier assigned by the remote system
    pub id: String,
    /// Owning organization
    #[serde(default)]
    pub organization_id: String,
    /// Whether the batch is confirmed for execution
    #[serde(default)]
    pub confirmed: bool,
    /// Whether the batch was executed synchronously
    #[serde(default)]
    pub synchronous: bool,
    /// Actions in submission order
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Current status
    #[serde(default)]
    pub status: BatchStatus,
}

impl ActionBatch {
    /// Shorthand for `self.status.state()`.
    pub fn state(&self) -> BatchState {
        self.status.state()
    }
}

/// Request body for batch submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewActionBatch {
    /// Execute once received; unconfirmed batches wait for a confirmation
    pub confirmed: bool,
    /// Resolve the batch within the submission request
    pub synchronous: bool,
    /// Ordered actions
    pub actions: Vec<Action>,
}

impl NewActionBatch {
    /// A confirmed batch executed within the submit call.
    pub fn synchronous(actions: Vec<Action>) -> Self {
        Self {
            confirmed: true,
            synchronous: true,
            actions,
        }
    }

    /// A confirmed batch executed in the background.
    pub fn asynchronous(actions: Vec<Action>) -> Self {
        Self {
            confirmed: true,
            synchronous: false,
            actions,
        }
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if the batch has no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Request body for confirming an existing batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct BatchUpdate {
    pub confirmed: bool,
    pub synchronous: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Operation;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn status(completed: bool, failed: bool) -> BatchStatus {
        BatchStatus {
            completed,
            failed,
            ..Default::default()
        }
    }

    #[test]
    fn test_state_classification() {
        assert_eq!(status(false, false).state(), BatchState::Pending);
        assert_eq!(status(true, false).state(), BatchState::Completed);
        assert_eq!(status(false, true).state(), BatchState::Failed);
        // ambiguous signal is never reported as success
        assert_eq!(status(true, true).state(), BatchState::Failed);
        assert!(!BatchState::Pending.is_terminal());
        assert!(BatchState::Failed.is_terminal());
    }

    #[test]
    fn test_decode_dashboard_response() {
        let body = json!({
            "id": "1234",
            "organizationId": "549236",
            "confirmed": true,
            "synchronous": false,
            "status": {
                "completed": true,
                "failed": false,
                "errors": [],
                "createdResources": [
                    { "id": "L_6468", "uri": "/networks/L_6468" }
                ]
            },
            "actions": [
                {
                    "resource": "/organizations/549236/networks",
                    "operation": "create",
                    "body": { "name": "Site 1" }
                }
            ]
        });

        let batch: ActionBatch = serde_json::from_value(body).unwrap();
        assert_eq!(batch.id, "1234");
        assert_eq!(batch.organization_id, "549236");
        assert_eq!(batch.state(), BatchState::Completed);
        assert_eq!(batch.actions.len(), 1);
        assert_eq!(batch.actions[0].operation(), Operation::Create);
        assert_eq!(
            batch.status.created_resource_map().get("/networks/L_6468"),
            Some(&"L_6468".to_string())
        );
    }

    #[test]
    fn test_decode_minimal_response() {
        let batch: ActionBatch = serde_json::from_value(json!({ "id": "9" })).unwrap();
        assert_eq!(batch.state(), BatchState::Pending);
        assert!(batch.actions.is_empty());
    }

    #[test]
    fn test_new_batch_body() {
        let batch = NewActionBatch::asynchronous(vec![]);
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({ "confirmed": true, "synchronous": false, "actions": [] })
        );
        assert!(batch.is_empty());
        assert!(NewActionBatch::synchronous(vec![]).synchronous);
    }
}
