//! LVM CSI Operator
//!
//! A Kubernetes operator that provisions and manages locally-attached,
//! LVM-backed block storage through the Container Storage Interface,
//! with topology-aware placement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Controller (cluster)                       │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │ ProtocolAdapter  │  │ CapacityTracker  │  │  NodeRemoval   │  │
//! │  │ (CSI surface)    │  │ (placement)      │  │  Coordinator   │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  └───────┬────────┘  │
//! │           │                     │                    │           │
//! │           └────────────┬────────┴────────────────────┘           │
//! │                        │                                         │
//! │              ┌─────────┴──────────┐                              │
//! │              │ LogicalVolume CRD  │  (spec: desired, status:     │
//! │              │ (cluster store)    │   observed, finalizer-gated) │
//! │              └─────────┬──────────┘                              │
//! ├────────────────────────┼─────────────────────────────────────────┤
//! │                        │       Node agent (per node)             │
//! │              ┌─────────┴──────────┐      ┌───────────────────┐   │
//! │              │ VolumeStateMachine ├──────┤ lvmd (LVM daemon) │   │
//! │              └────────────────────┘      └───────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`capacity`]: per-node capacity accounting and placement queries
//! - [`volume`]: the LogicalVolume lifecycle state machine
//! - [`cleanup`]: forced unwinding when a node leaves the cluster
//! - [`csi`]: the provisioning-protocol surface
//! - [`crd`]: custom resource definitions and well-known metadata keys
//! - [`error`]: error types and retry classification
//! - [`metrics`]: prometheus counters shared across components

pub mod capacity;
pub mod cleanup;
pub mod config;
pub mod crd;
pub mod csi;
pub mod error;
pub mod metrics;
pub mod volume;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use capacity::{CapacityTracker, KubeNodeReader, NodeInfo, NodeReader, NodeReaderRef};

pub use cleanup::{ClaimRef, ClusterJanitor, ClusterJanitorRef, KubeJanitor, NodeRemovalCoordinator, PodRef};

pub use config::Config;

pub use crd::{
    capacity_key, LogicalVolume, LogicalVolumeSpec, LogicalVolumeStatus, VolumePhase,
    ANN_SELECTED_NODE, ANN_SKIP_NODE_FINALIZE, CAPACITY_KEY_PREFIX, DEFAULT_DEVICE_CLASS_NAME,
    LOGICAL_VOLUME_FINALIZER, NODE_FINALIZER, TOPOLOGY_NODE_KEY,
};

pub use csi::{
    CreateVolumeRequest, CreateVolumeResponse, CsiError, CsiErrorCode, DeleteVolumeRequest,
    ExpandVolumeRequest, ExpandVolumeResponse, NodeVolumeRequest, NodeVolumeResponse,
    ProtocolAdapter,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::Metrics;

pub use volume::{
    KubeVolumeStore, LvInfo, LvmService, LvmServiceRef, VolumeStateMachine, VolumeStore,
    VolumeStoreRef,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
