//! CSI-facing protocol surface
//!
//! Request/response types for the provisioning calls and the mapping
//! from the operator's typed errors onto protocol error classes. The
//! gRPC framing itself lives outside this crate; these types are what
//! the transport layer marshals to and from.

mod adapter;

pub use adapter::ProtocolAdapter;

use crate::error::Error;
use std::time::Duration;

// =============================================================================
// Error mapping
// =============================================================================

/// Protocol-level error classes, mirroring CSI/gRPC status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiErrorCode {
    /// Malformed or out-of-range request (client error)
    InvalidArgument,
    /// Referenced object does not exist (client error)
    NotFound,
    /// An incompatible object with the same name exists (client error)
    AlreadyExists,
    /// Request is valid but the object is not in a state to serve it
    FailedPrecondition,
    /// No node has enough free capacity
    ResourceExhausted,
    /// The convergence wait exceeded the caller's deadline; retryable
    DeadlineExceeded,
    /// Transient backend failure; retryable
    Unavailable,
    /// Non-retryable failure
    Internal,
}

/// Error returned to the protocol caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiError {
    pub code: CsiErrorCode,
    pub message: String,
}

impl CsiError {
    pub fn new(code: CsiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the caller may retry the identical request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            CsiErrorCode::DeadlineExceeded | CsiErrorCode::Unavailable
        )
    }
}

impl std::fmt::Display for CsiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for CsiError {}

impl From<Error> for CsiError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::NodeNotFound { .. }
            | Error::DeviceClassNotFound { .. }
            | Error::LabelNotSet { .. }
            | Error::VolumeNotFound { .. } => CsiErrorCode::NotFound,
            Error::InvalidState(_) => CsiErrorCode::FailedPrecondition,
            Error::Configuration(_) => CsiErrorCode::InvalidArgument,
            Error::Transient(_) | Error::Kube(_) => CsiErrorCode::Unavailable,
            Error::Timeout { .. } => CsiErrorCode::DeadlineExceeded,
            Error::Fatal { .. } => CsiErrorCode::Internal,
            Error::CapacityParse { .. } | Error::JsonParse(_) | Error::Internal(_) => {
                CsiErrorCode::Internal
            }
        };
        CsiError::new(code, err.to_string())
    }
}

// =============================================================================
// Request / response types
// =============================================================================

/// CreateVolume request
#[derive(Debug, Clone)]
pub struct CreateVolumeRequest {
    /// Volume name; doubles as the LogicalVolume resource name
    pub name: String,
    /// Requested size in bytes
    pub size_bytes: u64,
    /// Device class to carve from; empty string selects the default
    pub device_class: String,
    /// Topology constraint: the required topology-label value, if the
    /// scheduler already pinned the workload to a domain
    pub topology: Option<String>,
    /// Convergence deadline; the adapter's default applies when absent
    pub deadline: Option<Duration>,
}

/// CreateVolume response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVolumeResponse {
    /// Protocol volume identifier (the LogicalVolume resource name)
    pub volume_id: String,
    /// Provisioned size in bytes
    pub size_bytes: u64,
    /// Node the volume was placed on
    pub node_name: String,
}

/// ControllerExpandVolume request
#[derive(Debug, Clone)]
pub struct ExpandVolumeRequest {
    pub volume_id: String,
    /// New requested size; must not be smaller than the current spec
    pub size_bytes: u64,
    pub deadline: Option<Duration>,
}

/// ControllerExpandVolume response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandVolumeResponse {
    /// Size the backing volume converged to
    pub size_bytes: u64,
}

/// DeleteVolume request
#[derive(Debug, Clone)]
pub struct DeleteVolumeRequest {
    pub volume_id: String,
    pub deadline: Option<Duration>,
}

/// NodeStageVolume / NodePublishVolume request. Staging and publishing
/// are carried out by the node agent; the adapter only acknowledges the
/// volume's observed state.
#[derive(Debug, Clone)]
pub struct NodeVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

/// Acknowledgement for stage/publish calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVolumeResponse {
    /// Backing volume identifier the agent should operate on
    pub backing_volume_id: String,
    /// Observed size of the backing volume
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let e: CsiError = Error::VolumeNotFound { name: "v".into() }.into();
        assert_eq!(e.code, CsiErrorCode::NotFound);
        assert!(!e.is_retryable());

        let e: CsiError = Error::Transient("lvmd down".into()).into();
        assert_eq!(e.code, CsiErrorCode::Unavailable);
        assert!(e.is_retryable());

        let e: CsiError = Error::Timeout {
            operation: "create".into(),
        }
        .into();
        assert_eq!(e.code, CsiErrorCode::DeadlineExceeded);
        assert!(e.is_retryable());

        let e: CsiError = Error::Fatal {
            code: "CORRUPT".into(),
            message: "vg metadata damaged".into(),
        }
        .into();
        assert_eq!(e.code, CsiErrorCode::Internal);
        assert!(!e.is_retryable());
        assert!(e.message.contains("vg metadata damaged"));
    }
}
