//! Error types for provisioning operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use fleet_dashboard::DashboardError;

use crate::phase::Phase;

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can occur while provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Dashboard client or poller error.
    #[error(transparent)]
    Dashboard(#[from] DashboardError),

    /// The ledger file exists but cannot be trusted.
    #[error("Ledger {path} is corrupt: {message}")]
    LedgerCorrupt {
        /// Ledger file path.
        path: PathBuf,
        /// Parser or validation message.
        message: String,
    },

    /// Reading or writing the ledger failed.
    #[error("Ledger I/O error on {path}: {source}")]
    LedgerIo {
        /// Ledger file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A phase was invoked before its prerequisites were recorded.
    #[error("{phase} phase cannot run: {reason}")]
    PreconditionNotMet {
        /// The requested phase.
        phase: Phase,
        /// What is missing.
        reason: String,
    },

    /// A phase-wide batch failed remotely.
    #[error("{phase} phase failed in action batch {batch_id}: {}", errors.join("; "))]
    PhaseFailed {
        /// The failing phase.
        phase: Phase,
        /// The failing batch.
        batch_id: String,
        /// Errors reported by the remote system.
        errors: Vec<String>,
    },

    /// A site network could not be found after creation.
    #[error("Network '{name}' for site {site} not found in organization")]
    NetworkMissing {
        /// Site number.
        site: String,
        /// Expected network name.
        name: String,
    },

    /// Inventory data cannot be turned into actions.
    #[error("Invalid site {site}: {message}")]
    InvalidSite {
        /// Site number.
        site: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// An action body could not be encoded.
    #[error("Cannot encode action for {resource}: {message}")]
    Payload {
        /// Target resource of the action.
        resource: String,
        /// Serializer message.
        message: String,
    },

    /// The operator interrupted the run.
    #[error("Cancelled by operator")]
    Cancelled,

    /// Inventory file could not be read or parsed.
    #[error("Inventory {path}: {message}")]
    Inventory {
        /// Inventory file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },
}

impl ProvisionError {
    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid site error.
    pub fn invalid_site(site: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSite {
            site: site.into(),
            message: message.into(),
        }
    }

    /// Creates a precondition error.
    pub fn precondition(phase: Phase, reason: impl Into<String>) -> Self {
        Self::PreconditionNotMet {
            phase,
            reason: reason.into(),
        }
    }

    /// Returns true for operator cancellation at any layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ProvisionError::Cancelled | ProvisionError::Dashboard(DashboardError::Cancelled { .. })
        )
    }

    /// Returns true for configuration, credential and ledger trust problems.
    pub fn is_configuration(&self) -> bool {
        match self {
            ProvisionError::Config { .. }
            | ProvisionError::Inventory { .. }
            | ProvisionError::LedgerCorrupt { .. } => true,
            ProvisionError::Dashboard(e) => e.is_auth_failure(),
            _ => false,
        }
    }

    /// Error descriptions suitable for storing against a site.
    pub fn site_errors(&self) -> Vec<String> {
        match self {
            ProvisionError::Dashboard(DashboardError::BatchFailed { errors, .. })
            | ProvisionError::PhaseFailed { errors, .. } => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::precondition(Phase::Devices, "no networks recorded");
        assert_eq!(
            err.to_string(),
            "Devices phase cannot run: no networks recorded"
        );
    }

    #[test]
    fn test_phase_failed_display() {
        let err = ProvisionError::PhaseFailed {
            phase: Phase::Networks,
            batch_id: "77".to_string(),
            errors: vec!["Name taken".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Networks phase failed in action batch 77: Name taken"
        );
    }

    #[test]
    fn test_dashboard_error_is_transparent() {
        let err: ProvisionError = DashboardError::not_found("/networks/N_1").into();
        assert_eq!(err.to_string(), "Resource not found: /networks/N_1");
    }

    #[test]
    fn test_corrupt_ledger_is_configuration() {
        assert!(ProvisionError::LedgerCorrupt {
            path: PathBuf::from("ledger.json"),
            message: "eof".to_string()
        }
        .is_configuration());
    }

    #[test]
    fn test_cancellation_from_either_layer() {
        assert!(ProvisionError::Cancelled.is_cancelled());
        let poll: ProvisionError = DashboardError::Cancelled {
            batch_id: "b".to_string(),
        }
        .into();
        assert!(poll.is_cancelled());
    }

    #[test]
    fn test_configuration_classification() {
        let auth: ProvisionError = DashboardError::rejection(401, "").into();
        assert!(auth.is_configuration());
        assert!(ProvisionError::config("dashboard.organization_id", "missing").is_configuration());
        assert!(!ProvisionError::precondition(Phase::Devices, "x").is_configuration());
    }

    #[test]
    fn test_site_errors_keep_full_list() {
        let errors: Vec<String> = (0..50).map(|i| "x".repeat(100) + &i.to_string()).collect();
        let err: ProvisionError = DashboardError::BatchFailed {
            batch_id: "1".to_string(),
            errors: errors.clone(),
        }
        .into();
        assert_eq!(err.site_errors(), errors);
    }
}
