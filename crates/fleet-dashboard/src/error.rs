//! Error types for dashboard API operations.
//!
//! Every client operation returns either a parsed response or one of these
//! errors. Remote error bodies are carried verbatim since their shape varies
//! between endpoints.

use thiserror::Error;

/// Result type alias for dashboard operations.
pub type DashboardResult<T> = Result<T, DashboardError>;

/// Errors that can occur while talking to the dashboard API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DashboardError {
    /// The request never produced an HTTP response (connect, TLS, timeout).
    #[error("Transport error during {operation}: {message}")]
    Transport {
        /// The operation that was attempted (e.g., "submit action batch").
        operation: String,
        /// Error message from the HTTP stack.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("Remote rejected request (HTTP {status}): {body}")]
    RemoteRejection {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The referenced batch, network or organization does not exist.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// The resource path that was requested.
        resource: String,
    },

    /// The server answered with a success status but the body did not parse.
    #[error("Failed to decode response for {operation}: {message}")]
    Decode {
        /// The operation whose response failed to parse.
        operation: String,
        /// Parser error message.
        message: String,
    },

    /// The remote system reported terminal failure for a batch.
    #[error("Action batch {batch_id} failed: {}", errors.join("; "))]
    BatchFailed {
        /// The batch identifier.
        batch_id: String,
        /// Error descriptions reported by the remote system.
        errors: Vec<String>,
    },

    /// Polling gave up before the batch reached a terminal state.
    #[error("Action batch {batch_id} still pending after {attempts} polls")]
    PollTimeout {
        /// The batch identifier.
        batch_id: String,
        /// Number of fetches performed.
        attempts: u32,
    },

    /// Polling was cancelled by the caller.
    #[error("Polling of action batch {batch_id} was cancelled")]
    Cancelled {
        /// The batch identifier.
        batch_id: String,
    },

    /// The request was rejected locally before being sent.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message.
        message: String,
    },
}

impl DashboardError {
    /// Creates a transport error.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a remote rejection error.
    pub fn rejection(status: u16, body: impl Into<String>) -> Self {
        Self::RemoteRejection {
            status,
            body: body.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns true if repeating a *read* that produced this error may succeed.
    ///
    /// Never use this to decide whether to resubmit a batch containing
    /// `create` actions: the first submission may have been applied.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DashboardError::Transport { .. } | DashboardError::PollTimeout { .. }
        )
    }

    /// Returns true if this is a 401/403 rejection.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            DashboardError::RemoteRejection { status: 401 | 403, .. }
        )
    }

    /// Returns the error list if this is a remote batch failure.
    pub fn batch_errors(&self) -> Option<&[String]> {
        match self {
            DashboardError::BatchFailed { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DashboardError::not_found("/organizations/1/actionBatches/42");
        assert_eq!(
            err.to_string(),
            "Resource not found: /organizations/1/actionBatches/42"
        );
    }

    #[test]
    fn test_rejection_keeps_raw_body() {
        let err = DashboardError::rejection(400, "{\"errors\":[\"Too many actions\"]}");
        assert!(err.to_string().contains("HTTP 400"));
        assert!(err.to_string().contains("Too many actions"));
    }

    #[test]
    fn test_batch_failed_display() {
        let err = DashboardError::BatchFailed {
            batch_id: "123".to_string(),
            errors: vec!["VLAN 11 exists".to_string(), "bad serial".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Action batch 123 failed: VLAN 11 exists; bad serial"
        );
        assert_eq!(err.batch_errors().map(|e| e.len()), Some(2));
    }

    #[test]
    fn test_is_retryable() {
        assert!(DashboardError::transport("get action batch", "connection reset").is_retryable());
        assert!(!DashboardError::rejection(500, "oops").is_retryable());
        assert!(!DashboardError::not_found("x").is_retryable());
    }

    #[test]
    fn test_is_auth_failure() {
        assert!(DashboardError::rejection(401, "").is_auth_failure());
        assert!(DashboardError::rejection(403, "").is_auth_failure());
        assert!(!DashboardError::rejection(404, "").is_auth_failure());
    }
}
