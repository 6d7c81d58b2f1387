//! Operator configuration
//!
//! All tunables are collected into a single [`Config`] value constructed
//! once at startup and passed by reference into each component. There is
//! no process-global configuration state.

use std::time::Duration;

/// Operator-wide configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node this process runs on (node agent role). Empty for
    /// the controller role, which owns no volumes.
    pub node_name: String,

    /// Node label key used to partition nodes into topology domains.
    pub topology_label_key: String,

    /// Upper bound on the age of the cached node snapshot that capacity
    /// queries read from. Placement decisions may be off by at most the
    /// capacity consumed within this window.
    pub capacity_staleness: Duration,

    /// Interval between convergence polls in the CSI adapter.
    pub poll_interval: Duration,

    /// Default deadline for convergence waits when the caller supplies none.
    pub default_deadline: Duration,

    /// Nodes for which forced cleanup on removal is disabled. Volumes,
    /// claims and pods owned by these nodes are left untouched when the
    /// node disappears; this is a manual-intervention escape hatch.
    pub skip_finalize_nodes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            topology_label_key: crate::crd::TOPOLOGY_NODE_KEY.to_string(),
            capacity_staleness: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            default_deadline: Duration::from_secs(60),
            skip_finalize_nodes: Vec::new(),
        }
    }
}
