//! Error types for the LVM CSI operator
//!
//! Provides structured error types for capacity lookups, volume
//! reconciliation, node cleanup, and the CSI-facing adapter.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("Node not found: {node}")]
    NodeNotFound { node: String },

    #[error("Device class not found: {device_class}")]
    DeviceClassNotFound { device_class: String },

    #[error("Label not set: {key} on node {node}")]
    LabelNotSet { node: String, key: String },

    #[error("Logical volume not found: {name}")]
    VolumeNotFound { name: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity annotation on node {node} is not an integer: {value:?}")]
    CapacityParse { node: String, value: String },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    /// A requested transition would violate an invariant, e.g. a size
    /// decrease or a resize on a volume that has no backing identifier.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// RPC or network failure talking to the node-local volume manager.
    /// Always retried by re-driving the reconciliation loop.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Non-recoverable backing-volume condition. Recorded in the
    /// LogicalVolume status for operator visibility; not retried.
    #[error("Fatal failure ({code}): {message}")]
    Fatal { code: String, message: String },

    /// A wait for reconciliation convergence exceeded its deadline. The
    /// underlying mutation is not rolled back.
    #[error("Timed out waiting for {operation}")]
    Timeout { operation: String },
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Transient(_) => ErrorAction::RequeueWithBackoff,

            // The capacity annotation is republished periodically; a missing
            // or malformed value heals on the next collector pass.
            Error::DeviceClassNotFound { .. } | Error::CapacityParse { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Terminal conditions - wait for a spec change or operator action
            Error::Configuration(_) | Error::InvalidState(_) | Error::Fatal { .. } => {
                ErrorAction::NoRequeue
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Transient(_) | Error::Timeout { .. }
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::Transient("lvmd unreachable".into());
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);

        let err = Error::Fatal {
            code: "CORRUPT".into(),
            message: "vg metadata damaged".into(),
        };
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::CapacityParse {
            node: "worker-1".into(),
            value: "10Gi".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Transient("connection refused".into());
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let invalid = Error::InvalidState("size would shrink".into());
        assert!(!invalid.is_retryable());
        assert!(!invalid.is_transient());
    }
}
