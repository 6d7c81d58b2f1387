//! Read-only access to cluster node state
//!
//! Capacity annotations are rewritten periodically by the node agents, so
//! it is safe to serve these reads from an eventually-consistent cache;
//! the staleness bound is part of [`crate::config::Config`].

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Snapshot of the node attributes the operator cares about
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Node annotations (capacity values live here)
    pub annotations: BTreeMap<String, String>,
    /// Node labels (topology values live here)
    pub labels: BTreeMap<String, String>,
    /// Finalizer tokens present on the node
    pub finalizers: Vec<String>,
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            annotations: node.metadata.annotations.clone().unwrap_or_default(),
            labels: node.metadata.labels.clone().unwrap_or_default(),
            finalizers: node.metadata.finalizers.clone().unwrap_or_default(),
        }
    }
}

/// Port for reading node state snapshots.
///
/// `list_nodes` must return nodes in lexicographic name order so that
/// first-match and tie-break semantics in the capacity tracker are
/// deterministic.
#[async_trait]
pub trait NodeReader: Send + Sync {
    /// Fetch a single node by name; `Ok(None)` if it does not exist
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>>;

    /// List all nodes, sorted lexicographically by name
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
}

pub type NodeReaderRef = Arc<dyn NodeReader>;

// =============================================================================
// Kubernetes implementation
// =============================================================================

/// NodeReader backed by the Kubernetes API
pub struct KubeNodeReader {
    nodes: Api<Node>,
}

impl KubeNodeReader {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeReader for KubeNodeReader {
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
        match self.nodes.get_opt(name).await? {
            Some(node) => Ok(Some(NodeInfo::from(&node))),
            None => Ok(None),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let list = self.nodes.list(&ListParams::default()).await?;
        let mut infos: Vec<NodeInfo> = list.items.iter().map(NodeInfo::from).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}
