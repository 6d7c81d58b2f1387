//! Port for the cluster-wide LogicalVolume store
//!
//! The store is a versioned key-value space with optimistic concurrency:
//! status writes carry the resource version they were read at and a
//! conflicting concurrent write surfaces as a transient error, to be
//! retried by re-driving reconciliation. Single-writer-per-resource for
//! Status is enforced by rejecting writes whose claimed owner does not
//! match the resource's owning node.

use crate::crd::{LogicalVolume, LOGICAL_VOLUME_FINALIZER};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use std::sync::Arc;

/// Port for LogicalVolume resource access
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Fetch one resource by name; `Ok(None)` if absent
    async fn get(&self, name: &str) -> Result<Option<LogicalVolume>>;

    /// All resources owned by the given node
    async fn list_by_node(&self, node_name: &str) -> Result<Vec<LogicalVolume>>;

    /// Create a new resource. The deletion finalizer must already be set.
    async fn create(&self, lv: &LogicalVolume) -> Result<()>;

    /// Raise the requested size. Shrinking is the caller's error to catch;
    /// the store only persists.
    async fn update_spec_size(&self, name: &str, size_bytes: u64) -> Result<()>;

    /// Write the status subresource. `owner` must equal the resource's
    /// owning node; writes from anyone else are rejected.
    async fn update_status(&self, owner: &str, lv: &LogicalVolume) -> Result<()>;

    /// Remove the deletion finalizer. Removing an absent token, or
    /// touching an absent resource, is a no-op.
    async fn remove_finalizer(&self, name: &str) -> Result<()>;

    /// Request deletion. The resource lingers until its finalizer is
    /// removed. Deleting an absent resource is a no-op.
    async fn delete(&self, name: &str) -> Result<()>;
}

pub type VolumeStoreRef = Arc<dyn VolumeStore>;

pub(crate) fn ensure_owner(owner: &str, lv: &LogicalVolume) -> Result<()> {
    if lv.spec.node_name != owner {
        return Err(Error::InvalidState(format!(
            "status write for {} rejected: writer {:?} does not own it ({:?} does)",
            lv.name(),
            owner,
            lv.spec.node_name
        )));
    }
    Ok(())
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

// =============================================================================
// Kubernetes implementation
// =============================================================================

/// VolumeStore backed by the Kubernetes API
pub struct KubeVolumeStore {
    api: Api<LogicalVolume>,
}

impl KubeVolumeStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl VolumeStore for KubeVolumeStore {
    async fn get(&self, name: &str) -> Result<Option<LogicalVolume>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn list_by_node(&self, node_name: &str) -> Result<Vec<LogicalVolume>> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|lv| lv.spec.node_name == node_name)
            .collect())
    }

    async fn create(&self, lv: &LogicalVolume) -> Result<()> {
        self.api.create(&PostParams::default(), lv).await?;
        Ok(())
    }

    async fn update_spec_size(&self, name: &str, size_bytes: u64) -> Result<()> {
        let patch = json!({ "spec": { "sizeBytes": size_bytes } });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn update_status(&self, owner: &str, lv: &LogicalVolume) -> Result<()> {
        ensure_owner(owner, lv)?;
        // replace_status carries the resource version read earlier; a
        // concurrent writer turns into a 409, classified transient.
        let data = serde_json::to_vec(lv)?;
        self.api
            .replace_status(lv.name(), &PostParams::default(), data)
            .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str) -> Result<()> {
        let Some(lv) = self.api.get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = lv
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != LOGICAL_VOLUME_FINALIZER)
            .collect();
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        match self
            .api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // Purged between the get and the patch; someone else finished.
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
