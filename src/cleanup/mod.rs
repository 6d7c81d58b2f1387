//! Node removal cleanup
//!
//! When a node disappears from the cluster its agent can no longer run,
//! so volumes it owned are finalized through an administrative path and
//! the dependent claims and pods are released for rescheduling.

mod coordinator;
mod janitor;

pub use coordinator::NodeRemovalCoordinator;
pub use janitor::{ClaimRef, ClusterJanitor, ClusterJanitorRef, KubeJanitor, PodRef};
