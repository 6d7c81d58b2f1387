//! LogicalVolume CRD
//!
//! The cluster-wide declarative record of an LVM logical volume: the spec
//! carries the requester's desired state, the status is written only by
//! the agent on the owning node.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// LogicalVolume CRD
// =============================================================================

/// LogicalVolume tracks one LVM-backed volume: which node owns it, which
/// device class (volume group) it is carved from, and the requested size.
/// Size may only ever grow; shrink requests are rejected.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "lvm.csi.dev",
    version = "v1",
    kind = "LogicalVolume",
    plural = "logicalvolumes",
    shortname = "lv",
    status = "LogicalVolumeStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeName"}"#,
    printcolumn = r#"{"name": "Class", "type": "string", "jsonPath": ".spec.deviceClass"}"#,
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.sizeBytes"}"#,
    printcolumn = r#"{"name": "Current", "type": "integer", "jsonPath": ".status.currentSizeBytes"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeSpec {
    /// Name of the node that owns the backing volume
    pub node_name: String,

    /// Device class (volume group pool) to carve the volume from.
    /// The empty string selects the node's default class.
    #[serde(default)]
    pub device_class: String,

    /// Requested size in bytes; monotonically non-decreasing
    pub size_bytes: u64,
}

/// Status of a LogicalVolume, written only by the owning node's agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeStatus {
    /// Backing volume identifier assigned by the node agent.
    /// Immutable once set; never reused after deletion.
    #[serde(default)]
    pub volume_id: Option<String>,

    /// Observed size of the backing volume in bytes.
    /// None means not yet observed or confirmed.
    #[serde(default)]
    pub current_size_bytes: Option<u64>,

    /// Terminal error code when reconciliation cannot proceed
    #[serde(default)]
    pub code: Option<String>,

    /// Human-readable message accompanying `code`
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Lifecycle phase
// =============================================================================

/// Lifecycle phase of a LogicalVolume, derived from spec/status deltas
/// rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumePhase {
    /// Resource created, no backing volume yet
    Pending,
    /// Backing volume exists and matches the requested size
    Ready,
    /// Spec asks for more bytes than the backing volume currently has
    Resizing,
    /// Deletion requested, finalizer still present
    Deleting,
    /// Reconciliation stopped on a fatal condition
    Failed,
}

impl std::fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumePhase::Pending => write!(f, "Pending"),
            VolumePhase::Ready => write!(f, "Ready"),
            VolumePhase::Resizing => write!(f, "Resizing"),
            VolumePhase::Deleting => write!(f, "Deleting"),
            VolumePhase::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl LogicalVolume {
    /// Get the resource name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Get the owning node name
    pub fn node_name(&self) -> &str {
        &self.spec.node_name
    }

    /// Backing volume identifier, if assigned
    pub fn volume_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.volume_id.as_deref())
    }

    /// Observed size of the backing volume, if confirmed
    pub fn current_size(&self) -> Option<u64> {
        self.status.as_ref().and_then(|s| s.current_size_bytes)
    }

    /// Whether deletion has been requested for this resource
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether reconciliation recorded a terminal failure
    pub fn is_failed(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.code.is_some())
            .unwrap_or(false)
    }

    /// Derive the lifecycle phase from the resource's current state
    pub fn phase(&self) -> VolumePhase {
        if self.is_deleting() {
            return VolumePhase::Deleting;
        }
        if self.is_failed() {
            return VolumePhase::Failed;
        }
        match (self.volume_id(), self.current_size()) {
            (None, _) => VolumePhase::Pending,
            (Some(_), None) => VolumePhase::Pending,
            (Some(_), Some(current)) if current < self.spec.size_bytes => VolumePhase::Resizing,
            _ => VolumePhase::Ready,
        }
    }
}
