//! Capacity tracker
//!
//! Answers placement queries over the per-node capacity annotations.
//! Targeted lookups are strict (missing node or class is an error) while
//! the cluster-wide total is lenient, because the total is only used for
//! observability and must not be blocked by one misbehaving node.

use crate::capacity::{NodeInfo, NodeReaderRef};
use crate::config::Config;
use crate::crd;
use crate::error::{Error, Result};

/// Read-only capacity accounting over a snapshot of cluster node state.
///
/// All queries enumerate nodes in lexicographic name order, so the
/// "first topology match" and "max capacity tie-break" results are
/// deterministic.
pub struct CapacityTracker {
    nodes: NodeReaderRef,
    topology_label_key: String,
}

impl CapacityTracker {
    pub fn new(config: &Config, nodes: NodeReaderRef) -> Self {
        Self {
            nodes,
            topology_label_key: config.topology_label_key.clone(),
        }
    }

    fn capacity_from_annotation(node: &NodeInfo, device_class: &str) -> Result<u64> {
        let key = crd::capacity_key(device_class);
        let value = node
            .annotations
            .get(&key)
            .ok_or_else(|| Error::DeviceClassNotFound {
                device_class: device_class.to_string(),
            })?;
        value.parse::<u64>().map_err(|_| Error::CapacityParse {
            node: node.name.clone(),
            value: value.clone(),
        })
    }

    /// Capacity of one node for one device class.
    pub async fn capacity_by_node(&self, node_name: &str, device_class: &str) -> Result<u64> {
        let node = self
            .nodes
            .get_node(node_name)
            .await?
            .ok_or_else(|| Error::NodeNotFound {
                node: node_name.to_string(),
            })?;
        Self::capacity_from_annotation(&node, device_class)
    }

    /// Capacity of the first node (in name order) whose topology label
    /// matches `topology`. If that node lacks the device class, the
    /// failure propagates; the scan does not continue to later nodes.
    pub async fn capacity_by_topology(&self, topology: &str, device_class: &str) -> Result<u64> {
        for node in self.nodes.list_nodes().await? {
            match node.labels.get(&self.topology_label_key) {
                Some(v) if v == topology => {
                    return Self::capacity_from_annotation(&node, device_class);
                }
                _ => continue,
            }
        }
        Err(Error::NodeNotFound {
            node: topology.to_string(),
        })
    }

    /// Total capacity across all nodes. A node with a missing or
    /// malformed annotation contributes zero; partial data never blocks
    /// the aggregate.
    pub async fn total_capacity(&self, device_class: &str) -> Result<u64> {
        let mut total = 0u64;
        for node in self.nodes.list_nodes().await? {
            // Saturate instead of overflowing; the aggregate is lenient.
            total =
                total.saturating_add(Self::capacity_from_annotation(&node, device_class).unwrap_or(0));
        }
        Ok(total)
    }

    /// Node with the largest capacity for the device class. Ties keep the
    /// lexicographically smallest node name. A cluster with no node
    /// reporting the class returns `("", 0)` rather than an error.
    pub async fn max_capacity(&self, device_class: &str) -> Result<(String, u64)> {
        let mut max_node = String::new();
        let mut max_capacity = 0u64;
        for node in self.nodes.list_nodes().await? {
            let c = Self::capacity_from_annotation(&node, device_class).unwrap_or(0);
            if c > max_capacity {
                max_capacity = c;
                max_node = node.name;
            }
        }
        Ok((max_node, max_capacity))
    }

    /// Value of a single node label.
    pub async fn label_value(&self, node_name: &str, key: &str) -> Result<String> {
        let node = self
            .nodes
            .get_node(node_name)
            .await?
            .ok_or_else(|| Error::NodeNotFound {
                node: node_name.to_string(),
            })?;
        node.labels
            .get(key)
            .cloned()
            .ok_or_else(|| Error::LabelNotSet {
                node: node_name.to_string(),
                key: key.to_string(),
            })
    }
}
