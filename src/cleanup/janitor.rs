//! Port for the claim/pod/node cleanup operations
//!
//! The coordinator only needs a narrow slice of the cluster API: find
//! claims pinned to a node, find pods consuming a claim, delete both, and
//! drop the node finalizer once cleanup is done.

use crate::crd::{ANN_SELECTED_NODE, NODE_FINALIZER};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use std::sync::Arc;

/// A claim pinned to a node via the selected-node annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
}

/// A pod consuming one of the released claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

/// Port for releasing workloads bound to a removed node
#[async_trait]
pub trait ClusterJanitor: Send + Sync {
    /// Claims whose selected-node annotation names the given node
    async fn claims_on_node(&self, node_name: &str) -> Result<Vec<ClaimRef>>;

    /// Pods mounting the given claim
    async fn pods_using_claim(&self, claim: &ClaimRef) -> Result<Vec<PodRef>>;

    /// Delete a claim; absent is a no-op
    async fn delete_claim(&self, claim: &ClaimRef) -> Result<()>;

    /// Delete a pod; absent is a no-op
    async fn delete_pod(&self, pod: &PodRef) -> Result<()>;

    /// Remove the operator's finalizer from the node object; absent
    /// node or token is a no-op
    async fn remove_node_finalizer(&self, node_name: &str) -> Result<()>;
}

pub type ClusterJanitorRef = Arc<dyn ClusterJanitor>;

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

// =============================================================================
// Kubernetes implementation
// =============================================================================

/// ClusterJanitor backed by the Kubernetes API
pub struct KubeJanitor {
    client: Client,
}

impl KubeJanitor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterJanitor for KubeJanitor {
    async fn claims_on_node(&self, node_name: &str) -> Result<Vec<ClaimRef>> {
        let pvcs: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let list = pvcs.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|pvc| {
                pvc.metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(ANN_SELECTED_NODE))
                    .map(|v| v == node_name)
                    .unwrap_or(false)
            })
            .map(|pvc| ClaimRef {
                namespace: pvc.metadata.namespace.unwrap_or_default(),
                name: pvc.metadata.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn pods_using_claim(&self, claim: &ClaimRef) -> Result<Vec<PodRef>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &claim.namespace);
        let list = pods.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|pod| {
                pod.spec
                    .as_ref()
                    .map(|spec| {
                        spec.volumes.as_deref().unwrap_or_default().iter().any(|v| {
                            v.persistent_volume_claim
                                .as_ref()
                                .map(|pvc| pvc.claim_name == claim.name)
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false)
            })
            .map(|pod| PodRef {
                namespace: claim.namespace.clone(),
                name: pod.metadata.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_claim(&self, claim: &ClaimRef) -> Result<()> {
        let pvcs: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &claim.namespace);
        match pvcs.delete(&claim.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, pod: &PodRef) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        match pods.delete(&pod.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_node_finalizer(&self, node_name: &str) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let Some(node) = nodes.get_opt(node_name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = node
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != NODE_FINALIZER)
            .collect();
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        match nodes
            .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
