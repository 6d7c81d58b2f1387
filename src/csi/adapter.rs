//! Protocol adapter
//!
//! Translates provisioning-protocol calls into LogicalVolume mutations
//! plus a bounded poll for convergence. A wait that exceeds its deadline
//! returns a retryable failure without rolling anything back: the
//! reconciliation keeps running in the background and the next call with
//! the same identifiers resumes from the persisted state.

use crate::capacity::CapacityTracker;
use crate::config::Config;
use crate::crd::{LogicalVolume, LogicalVolumeSpec, LOGICAL_VOLUME_FINALIZER};
use crate::csi::{
    CreateVolumeRequest, CreateVolumeResponse, CsiError, CsiErrorCode, DeleteVolumeRequest,
    ExpandVolumeRequest, ExpandVolumeResponse, NodeVolumeRequest, NodeVolumeResponse,
};
use crate::volume::VolumeStoreRef;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Maps CSI provisioning calls onto the volume state machine's resources
/// and the capacity tracker's placement queries.
pub struct ProtocolAdapter {
    tracker: Arc<CapacityTracker>,
    store: VolumeStoreRef,
    poll_interval: Duration,
    default_deadline: Duration,
}

impl ProtocolAdapter {
    pub fn new(config: &Config, tracker: Arc<CapacityTracker>, store: VolumeStoreRef) -> Self {
        Self {
            tracker,
            store,
            poll_interval: config.poll_interval,
            default_deadline: config.default_deadline,
        }
    }

    /// CreateVolume: place the volume, create the resource, wait for the
    /// owning node's agent to report a backing identifier.
    pub async fn create_volume(
        &self,
        req: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::new(
                CsiErrorCode::InvalidArgument,
                "volume name must not be empty",
            ));
        }
        if req.size_bytes == 0 {
            return Err(CsiError::new(
                CsiErrorCode::InvalidArgument,
                "requested size must be positive",
            ));
        }

        // The capacity collector publishes the node's own name as its
        // topology label value, so a topology constraint names the node
        // directly.
        let node_name = match &req.topology {
            Some(topology) => {
                let capacity = self
                    .tracker
                    .capacity_by_topology(topology, &req.device_class)
                    .await?;
                if capacity < req.size_bytes {
                    return Err(CsiError::new(
                        CsiErrorCode::ResourceExhausted,
                        format!(
                            "topology {topology} has {capacity} bytes free, {} requested",
                            req.size_bytes
                        ),
                    ));
                }
                topology.clone()
            }
            None => {
                let (node, capacity) = self.tracker.max_capacity(&req.device_class).await?;
                if node.is_empty() || capacity < req.size_bytes {
                    return Err(CsiError::new(
                        CsiErrorCode::ResourceExhausted,
                        format!(
                            "no node has {} bytes free for device class {:?}",
                            req.size_bytes, req.device_class
                        ),
                    ));
                }
                node
            }
        };

        match self.store.get(&req.name).await.map_err(CsiError::from)? {
            Some(existing) => {
                if existing.spec.size_bytes != req.size_bytes
                    || existing.spec.device_class != req.device_class
                {
                    return Err(CsiError::new(
                        CsiErrorCode::AlreadyExists,
                        format!("volume {} exists with an incompatible spec", req.name),
                    ));
                }
                // Same request resumed; fall through to the wait.
                debug!(volume = %req.name, "create resumed on existing resource");
            }
            None => {
                let mut lv = LogicalVolume::new(
                    &req.name,
                    LogicalVolumeSpec {
                        node_name: node_name.clone(),
                        device_class: req.device_class.clone(),
                        size_bytes: req.size_bytes,
                    },
                );
                lv.metadata.finalizers = Some(vec![LOGICAL_VOLUME_FINALIZER.into()]);
                self.store.create(&lv).await.map_err(CsiError::from)?;
                info!(volume = %req.name, node = %node_name, size = req.size_bytes, "volume resource created");
            }
        }

        let deadline = req.deadline.unwrap_or(self.default_deadline);
        let lv = self.await_provisioned(&req.name, deadline).await?;
        Ok(CreateVolumeResponse {
            volume_id: req.name,
            size_bytes: lv.current_size().unwrap_or(req.size_bytes),
            node_name: lv.spec.node_name,
        })
    }

    /// ControllerExpandVolume: raise the spec size and wait until the
    /// observed size catches up.
    pub async fn expand_volume(
        &self,
        req: ExpandVolumeRequest,
    ) -> Result<ExpandVolumeResponse, CsiError> {
        let lv = self
            .store
            .get(&req.volume_id)
            .await
            .map_err(CsiError::from)?
            .ok_or_else(|| {
                CsiError::new(
                    CsiErrorCode::NotFound,
                    format!("no such volume: {}", req.volume_id),
                )
            })?;

        if req.size_bytes < lv.spec.size_bytes {
            return Err(CsiError::new(
                CsiErrorCode::InvalidArgument,
                format!(
                    "size may not decrease: current spec {} bytes, requested {}",
                    lv.spec.size_bytes, req.size_bytes
                ),
            ));
        }
        if lv.current_size().map(|c| c >= req.size_bytes).unwrap_or(false) {
            return Ok(ExpandVolumeResponse {
                size_bytes: req.size_bytes,
            });
        }

        self.store
            .update_spec_size(&req.volume_id, req.size_bytes)
            .await
            .map_err(CsiError::from)?;

        let deadline = req.deadline.unwrap_or(self.default_deadline);
        self.await_size(&req.volume_id, req.size_bytes, deadline)
            .await?;
        Ok(ExpandVolumeResponse {
            size_bytes: req.size_bytes,
        })
    }

    /// DeleteVolume: request deletion and wait for the finalizer-gated
    /// purge. Deleting an unknown volume succeeds.
    pub async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        if self
            .store
            .get(&req.volume_id)
            .await
            .map_err(CsiError::from)?
            .is_none()
        {
            return Ok(());
        }
        self.store
            .delete(&req.volume_id)
            .await
            .map_err(CsiError::from)?;

        let deadline = req.deadline.unwrap_or(self.default_deadline);
        self.await_purged(&req.volume_id, deadline).await
    }

    /// NodeStageVolume: acknowledge the volume's observed state; the node
    /// agent performs the actual staging.
    pub async fn node_stage_volume(
        &self,
        req: NodeVolumeRequest,
    ) -> Result<NodeVolumeResponse, CsiError> {
        self.acknowledge(req).await
    }

    /// NodePublishVolume: same acknowledgement surface as staging.
    pub async fn node_publish_volume(
        &self,
        req: NodeVolumeRequest,
    ) -> Result<NodeVolumeResponse, CsiError> {
        self.acknowledge(req).await
    }

    async fn acknowledge(&self, req: NodeVolumeRequest) -> Result<NodeVolumeResponse, CsiError> {
        if req.target_path.is_empty() {
            return Err(CsiError::new(
                CsiErrorCode::InvalidArgument,
                "target path must not be empty",
            ));
        }
        let lv = self
            .store
            .get(&req.volume_id)
            .await
            .map_err(CsiError::from)?
            .ok_or_else(|| {
                CsiError::new(
                    CsiErrorCode::NotFound,
                    format!("no such volume: {}", req.volume_id),
                )
            })?;
        let backing = lv.volume_id().ok_or_else(|| {
            CsiError::new(
                CsiErrorCode::FailedPrecondition,
                format!("volume {} has no backing volume yet", req.volume_id),
            )
        })?;
        Ok(NodeVolumeResponse {
            backing_volume_id: backing.to_string(),
            size_bytes: lv.current_size().unwrap_or(lv.spec.size_bytes),
        })
    }

    fn failed_status(lv: &LogicalVolume) -> Option<CsiError> {
        let status = lv.status.as_ref()?;
        let code = status.code.as_ref()?;
        Some(CsiError::new(
            CsiErrorCode::Internal,
            format!(
                "{}: {}",
                code,
                status.message.as_deref().unwrap_or("reconciliation failed")
            ),
        ))
    }

    async fn await_provisioned(
        &self,
        name: &str,
        deadline: Duration,
    ) -> Result<LogicalVolume, CsiError> {
        let start = Instant::now();
        loop {
            if let Some(lv) = self.store.get(name).await.map_err(CsiError::from)? {
                if let Some(err) = Self::failed_status(&lv) {
                    return Err(err);
                }
                if lv.volume_id().is_some() && lv.current_size().is_some() {
                    return Ok(lv);
                }
            }
            if start.elapsed() >= deadline {
                return Err(CsiError::new(
                    CsiErrorCode::DeadlineExceeded,
                    format!("timed out waiting for {name} to be provisioned"),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn await_size(
        &self,
        name: &str,
        size_bytes: u64,
        deadline: Duration,
    ) -> Result<(), CsiError> {
        let start = Instant::now();
        loop {
            let lv = self.store.get(name).await.map_err(CsiError::from)?.ok_or_else(|| {
                CsiError::new(CsiErrorCode::NotFound, format!("volume {name} disappeared"))
            })?;
            if let Some(err) = Self::failed_status(&lv) {
                return Err(err);
            }
            if lv.current_size().map(|c| c >= size_bytes).unwrap_or(false) {
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(CsiError::new(
                    CsiErrorCode::DeadlineExceeded,
                    format!("timed out waiting for {name} to reach {size_bytes} bytes"),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn await_purged(&self, name: &str, deadline: Duration) -> Result<(), CsiError> {
        let start = Instant::now();
        loop {
            match self.store.get(name).await.map_err(CsiError::from)? {
                None => return Ok(()),
                Some(lv) => {
                    if let Some(err) = Self::failed_status(&lv) {
                        return Err(err);
                    }
                }
            }
            if start.elapsed() >= deadline {
                return Err(CsiError::new(
                    CsiErrorCode::DeadlineExceeded,
                    format!("timed out waiting for {name} to be purged"),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
