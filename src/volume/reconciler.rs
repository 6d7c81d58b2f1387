//! Volume state machine
//!
//! Reconciles one LogicalVolume at a time against the node-local volume
//! manager. The pass is idempotent and crash-safe: the agent may be
//! killed at any point and the next pass converges from whatever state
//! was persisted. Only the agent on the owning node runs this for a
//! given resource, which keeps Status single-writer.

use crate::config::Config;
use crate::crd::LogicalVolume;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::volume::{LvmServiceRef, VolumeStoreRef};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives a LogicalVolume through its lifecycle:
/// provisioning, size growth, and finalizer-gated deletion.
pub struct VolumeStateMachine {
    store: VolumeStoreRef,
    lvm: LvmServiceRef,
    node_name: String,
    retry_interval: Duration,
    retry_deadline: Duration,
    reconcile_errors: prometheus::IntCounter,
    resizes: prometheus::IntCounter,
}

impl VolumeStateMachine {
    pub fn new(
        config: &Config,
        store: VolumeStoreRef,
        lvm: LvmServiceRef,
        metrics: &Metrics,
    ) -> Self {
        Self {
            store,
            lvm,
            node_name: config.node_name.clone(),
            retry_interval: config.poll_interval,
            retry_deadline: config.default_deadline,
            reconcile_errors: metrics.reconcile_errors.clone(),
            resizes: metrics.resizes.clone(),
        }
    }

    /// Run one reconciliation pass for the named resource.
    ///
    /// Transient failures bubble up for the caller to retry; fatal ones
    /// are recorded in the status and the resource is left alone until an
    /// operator intervenes.
    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let Some(lv) = self.store.get(name).await? else {
            debug!(volume = name, "resource gone, nothing to reconcile");
            return Ok(());
        };
        if lv.spec.node_name != self.node_name {
            // Not ours; the owning node's agent will handle it.
            return Ok(());
        }
        match self.reconcile_owned(lv).await {
            Ok(()) => Ok(()),
            Err(Error::Fatal { code, message }) => {
                self.reconcile_errors.inc();
                self.record_failure(name, code, message).await
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile every resource owned by this node, re-driving transient
    /// failures in place. Used by the agent's periodic resync; a resource
    /// that stays broken past its retry deadline is logged and does not
    /// stop the sweep.
    pub async fn reconcile_all(&self) -> Result<()> {
        for lv in self.store.list_by_node(&self.node_name).await? {
            if let Err(e) = self.reconcile_with_retry(lv.name()).await {
                self.reconcile_errors.inc();
                warn!(volume = lv.name(), error = %e, "reconcile failed, next resync retries");
            }
        }
        Ok(())
    }

    /// Run one pass, retrying transient failures with exponential backoff
    /// until the configured deadline elapses.
    pub async fn reconcile_with_retry(&self, name: &str) -> Result<()> {
        let policy = backoff::ExponentialBackoff {
            initial_interval: self.retry_interval,
            max_elapsed_time: Some(self.retry_deadline),
            ..Default::default()
        };
        let op = || async {
            self.reconcile(name).await.map_err(|e| {
                if e.is_transient() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        };
        backoff::future::retry(policy, op).await
    }

    async fn reconcile_owned(&self, lv: LogicalVolume) -> Result<()> {
        if lv.is_failed() {
            // A terminal condition is recorded; even a pending deletion
            // stays parked until an operator clears it.
            return Ok(());
        }
        if lv.is_deleting() {
            return self.finalize(lv).await;
        }
        let lv = match lv.volume_id() {
            None => self.provision(lv).await?,
            Some(_) => lv,
        };
        let lv = match lv.current_size() {
            None => self.observe_size(lv).await?,
            Some(_) => lv,
        };
        self.converge_size(lv).await
    }

    /// Create the backing volume and record its identifier and size.
    async fn provision(&self, mut lv: LogicalVolume) -> Result<LogicalVolume> {
        let info = self
            .lvm
            .create_lv(lv.name(), &lv.spec.device_class, lv.spec.size_bytes)
            .await?;
        info!(
            volume = lv.name(),
            volume_id = %info.volume_id,
            size_bytes = info.size_bytes,
            "provisioned backing volume"
        );
        let mut status = lv.status.take().unwrap_or_default();
        status.volume_id = Some(info.volume_id);
        status.current_size_bytes = Some(info.size_bytes);
        lv.status = Some(status);
        self.store.update_status(&self.node_name, &lv).await?;
        Ok(lv)
    }

    /// CurrentSize is unconfirmed but an identifier is assigned: adopt
    /// the actual observed size of the backing volume without mutating
    /// it. A later grow, if the spec asks for one, happens in
    /// [`Self::converge_size`] on the same pass.
    async fn observe_size(&self, mut lv: LogicalVolume) -> Result<LogicalVolume> {
        let id = lv
            .volume_id()
            .map(String::from)
            .ok_or_else(|| Error::Internal("observe_size without a volume id".into()))?;
        let info = match self.lvm.get_lv(&id).await? {
            Some(info) => info,
            // The backing volume vanished out from under an assigned
            // identifier. The agent derives the backing name from the
            // resource name, so an idempotent create restores it under
            // the same identifier.
            None => {
                warn!(volume = lv.name(), volume_id = %id, "backing volume missing, recreating");
                self.lvm
                    .create_lv(lv.name(), &lv.spec.device_class, lv.spec.size_bytes)
                    .await?
            }
        };
        if info.volume_id != id {
            return Err(Error::Fatal {
                code: "BACKING_LOST".into(),
                message: format!(
                    "backing volume for {} reappeared under a different identifier {}",
                    lv.name(),
                    info.volume_id
                ),
            });
        }
        debug!(
            volume = lv.name(),
            size_bytes = info.size_bytes,
            "adopted observed backing size"
        );
        let mut status = lv.status.take().unwrap_or_default();
        status.current_size_bytes = Some(info.size_bytes);
        lv.status = Some(status);
        self.store.update_status(&self.node_name, &lv).await?;
        Ok(lv)
    }

    /// Grow the backing volume when the spec asks for more bytes than
    /// observed. Never shrinks, never resizes when already converged.
    async fn converge_size(&self, mut lv: LogicalVolume) -> Result<()> {
        let current = lv
            .current_size()
            .ok_or_else(|| Error::Internal("converge_size without an observed size".into()))?;
        let requested = lv.spec.size_bytes;
        if requested < current {
            warn!(
                volume = lv.name(),
                current, requested, "shrink requested; not supported, keeping current size"
            );
            return Ok(());
        }
        if requested == current {
            return Ok(());
        }
        let id = lv
            .volume_id()
            .map(String::from)
            .ok_or_else(|| Error::Internal("resize without a volume id".into()))?;
        self.lvm.resize_lv(&id, requested).await?;
        self.resizes.inc();
        info!(
            volume = lv.name(),
            volume_id = %id,
            from = current,
            to = requested,
            "grew backing volume"
        );
        // CurrentSize advances only after the resize reported success.
        let mut status = lv.status.take().unwrap_or_default();
        status.current_size_bytes = Some(requested);
        lv.status = Some(status);
        self.store.update_status(&self.node_name, &lv).await
    }

    /// Tear down the backing volume, then release the finalizer so the
    /// store can purge the resource. An already-absent backing volume
    /// counts as released.
    async fn finalize(&self, lv: LogicalVolume) -> Result<()> {
        if let Some(id) = lv.volume_id() {
            self.lvm.remove_lv(id).await?;
            info!(volume = lv.name(), volume_id = %id, "released backing volume");
        }
        self.store.remove_finalizer(lv.name()).await
    }

    async fn record_failure(&self, name: &str, code: String, message: String) -> Result<()> {
        warn!(volume = name, code = %code, %message, "recording fatal condition");
        let Some(mut lv) = self.store.get(name).await? else {
            return Ok(());
        };
        let mut status = lv.status.take().unwrap_or_default();
        status.code = Some(code);
        status.message = Some(message);
        lv.status = Some(status);
        self.store.update_status(&self.node_name, &lv).await
    }
}
