//! Custom Resource Definitions and well-known cluster metadata keys

mod logical_volume;

pub use logical_volume::{LogicalVolume, LogicalVolumeSpec, LogicalVolumeStatus, VolumePhase};

/// API group for the operator's custom resources
pub const GROUP: &str = "lvm.csi.dev";

/// Prefix of the per-node capacity annotations. The full key is the prefix
/// followed by the device class name.
pub const CAPACITY_KEY_PREFIX: &str = "capacity.lvm.csi.dev/";

/// Reserved device class name denoting the node's default pool
pub const DEFAULT_DEVICE_CLASS_NAME: &str = "";

/// Annotation key suffix used for the default device class. Device class
/// names may not start with a digit, so this cannot collide with a named
/// class.
pub const DEFAULT_DEVICE_CLASS_KEY: &str = "00default";

/// Default node label key used for topology-aware scheduling. The capacity
/// collector publishes the node's own name as the value.
pub const TOPOLOGY_NODE_KEY: &str = "topology.lvm.csi.dev/node";

/// Finalizer token gating LogicalVolume deletion
pub const LOGICAL_VOLUME_FINALIZER: &str = "lvm.csi.dev/logical-volume";

/// Finalizer token added to every Node at registration time; its presence
/// on a deleted node is what triggers the removal coordinator.
pub const NODE_FINALIZER: &str = "lvm.csi.dev/node";

/// Node annotation that disables forced cleanup when the node is removed
pub const ANN_SKIP_NODE_FINALIZE: &str = "lvm.csi.dev/skip-node-finalize";

/// PVC annotation recording the node the claim was scheduled to
pub const ANN_SELECTED_NODE: &str = "volume.kubernetes.io/selected-node";

/// Resolve a device class name to its capacity annotation key.
pub fn capacity_key(device_class: &str) -> String {
    if device_class == DEFAULT_DEVICE_CLASS_NAME {
        format!("{}{}", CAPACITY_KEY_PREFIX, DEFAULT_DEVICE_CLASS_KEY)
    } else {
        format!("{}{}", CAPACITY_KEY_PREFIX, device_class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_key() {
        assert_eq!(capacity_key("ssd"), "capacity.lvm.csi.dev/ssd");
        assert_eq!(capacity_key(""), "capacity.lvm.csi.dev/00default");
    }
}
