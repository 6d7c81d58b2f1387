//! In-memory fakes shared across unit tests

use crate::capacity::{NodeInfo, NodeReader};
use crate::crd::{self, LogicalVolume, LOGICAL_VOLUME_FINALIZER};
use crate::error::{Error, Result};
use crate::volume::{ensure_owner, LvInfo, LvmService, VolumeStore};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use parking_lot::Mutex;
use std::collections::BTreeMap;

// =============================================================================
// FakeNodes
// =============================================================================

/// NodeReader over a fixed set of nodes, built up by the test
#[derive(Default)]
pub struct FakeNodes {
    nodes: BTreeMap<String, NodeInfo>,
}

impl FakeNodes {
    /// Add a node with capacity annotations (per device class) and labels
    pub fn add_node(&mut self, name: &str, capacities: &[(&str, &str)], labels: &[(&str, &str)]) {
        let mut info = NodeInfo {
            name: name.to_string(),
            ..Default::default()
        };
        for (class, value) in capacities {
            info.annotations
                .insert(crd::capacity_key(class), value.to_string());
        }
        for (key, value) in labels {
            info.labels.insert(key.to_string(), value.to_string());
        }
        self.nodes.insert(name.to_string(), info);
    }

    pub fn add_node_with_raw_annotation(&mut self, name: &str, key: &str, value: &str) {
        let mut info = NodeInfo {
            name: name.to_string(),
            ..Default::default()
        };
        info.annotations.insert(key.to_string(), value.to_string());
        self.nodes.insert(name.to_string(), info);
    }

    pub fn set_label(&mut self, name: &str, key: &str, value: &str) {
        if let Some(info) = self.nodes.get_mut(name) {
            info.labels.insert(key.to_string(), value.to_string());
        }
    }

}

#[async_trait]
impl NodeReader for FakeNodes {
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
        Ok(self.nodes.get(name).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        // BTreeMap iteration is already lexicographic by name.
        Ok(self.nodes.values().cloned().collect())
    }
}

// =============================================================================
// InMemoryVolumeStore
// =============================================================================

/// VolumeStore with Kubernetes-like finalizer semantics: a deleted
/// resource lingers with a deletion timestamp until its finalizer is
/// removed, then it is purged.
#[derive(Default)]
pub struct InMemoryVolumeStore {
    volumes: Mutex<BTreeMap<String, LogicalVolume>>,
}

impl InMemoryVolumeStore {
    /// Simulate an out-of-band status wipe, as an admin clearing the
    /// observed size would.
    pub fn clear_current_size(&self, name: &str) {
        let mut volumes = self.volumes.lock();
        if let Some(lv) = volumes.get_mut(name) {
            if let Some(status) = lv.status.as_mut() {
                status.current_size_bytes = None;
            }
        }
    }

    /// Set the requested size directly, bypassing the shrink guard.
    pub fn set_spec_size(&self, name: &str, size_bytes: u64) {
        let mut volumes = self.volumes.lock();
        if let Some(lv) = volumes.get_mut(name) {
            lv.spec.size_bytes = size_bytes;
        }
    }

    fn purge_if_released(volumes: &mut BTreeMap<String, LogicalVolume>, name: &str) {
        let purge = volumes
            .get(name)
            .map(|lv| {
                lv.metadata.deletion_timestamp.is_some()
                    && lv
                        .metadata
                        .finalizers
                        .as_ref()
                        .map(|f| f.is_empty())
                        .unwrap_or(true)
            })
            .unwrap_or(false);
        if purge {
            volumes.remove(name);
        }
    }
}

#[async_trait]
impl VolumeStore for InMemoryVolumeStore {
    async fn get(&self, name: &str) -> Result<Option<LogicalVolume>> {
        Ok(self.volumes.lock().get(name).cloned())
    }

    async fn list_by_node(&self, node_name: &str) -> Result<Vec<LogicalVolume>> {
        Ok(self
            .volumes
            .lock()
            .values()
            .filter(|lv| lv.spec.node_name == node_name)
            .cloned()
            .collect())
    }

    async fn create(&self, lv: &LogicalVolume) -> Result<()> {
        let mut volumes = self.volumes.lock();
        if volumes.contains_key(lv.name()) {
            return Err(Error::InvalidState(format!(
                "logical volume {} already exists",
                lv.name()
            )));
        }
        volumes.insert(lv.name().to_string(), lv.clone());
        Ok(())
    }

    async fn update_spec_size(&self, name: &str, size_bytes: u64) -> Result<()> {
        let mut volumes = self.volumes.lock();
        let lv = volumes
            .get_mut(name)
            .ok_or_else(|| Error::VolumeNotFound { name: name.into() })?;
        lv.spec.size_bytes = size_bytes;
        Ok(())
    }

    async fn update_status(&self, owner: &str, lv: &LogicalVolume) -> Result<()> {
        ensure_owner(owner, lv)?;
        let mut volumes = self.volumes.lock();
        let stored = volumes
            .get_mut(lv.name())
            .ok_or_else(|| Error::VolumeNotFound {
                name: lv.name().into(),
            })?;
        stored.status = lv.status.clone();
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str) -> Result<()> {
        let mut volumes = self.volumes.lock();
        if let Some(lv) = volumes.get_mut(name) {
            if let Some(finalizers) = lv.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != LOGICAL_VOLUME_FINALIZER);
            }
        }
        Self::purge_if_released(&mut volumes, name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut volumes = self.volumes.lock();
        if let Some(lv) = volumes.get_mut(name) {
            if lv.metadata.deletion_timestamp.is_none() {
                lv.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            }
        }
        Self::purge_if_released(&mut volumes, name);
        Ok(())
    }
}

// =============================================================================
// FakeLvm
// =============================================================================

#[derive(Debug, Clone)]
enum FailMode {
    Transient(String),
    Fatal { code: String, message: String },
}

#[derive(Default)]
struct FakeLvmInner {
    // keyed by resource name; volume id is derived from it
    lvs: BTreeMap<String, LvInfo>,
    create_calls: usize,
    resize_calls: usize,
    remove_calls: usize,
    fail_next: Option<FailMode>,
}

/// LvmService over an in-memory volume table, with one-shot failure
/// injection and call counters.
#[derive(Default)]
pub struct FakeLvm {
    inner: Mutex<FakeLvmInner>,
}

impl FakeLvm {
    pub fn create_calls(&self) -> usize {
        self.inner.lock().create_calls
    }

    pub fn resize_calls(&self) -> usize {
        self.inner.lock().resize_calls
    }

    pub fn remove_calls(&self) -> usize {
        self.inner.lock().remove_calls
    }

    /// Actual size of a backing volume, by volume id
    pub fn size_of(&self, volume_id: &str) -> Option<u64> {
        self.inner
            .lock()
            .lvs
            .values()
            .find(|lv| lv.volume_id == volume_id)
            .map(|lv| lv.size_bytes)
    }

    /// Drop a backing volume without going through remove_lv
    pub fn wipe(&self, volume_id: &str) {
        self.inner
            .lock()
            .lvs
            .retain(|_, lv| lv.volume_id != volume_id);
    }

    /// Fail the next call with a transient error
    pub fn fail_next_transient(&self, message: &str) {
        self.inner.lock().fail_next = Some(FailMode::Transient(message.to_string()));
    }

    /// Fail the next call with a fatal error
    pub fn fail_next_fatal(&self, code: &str, message: &str) {
        self.inner.lock().fail_next = Some(FailMode::Fatal {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    fn take_failure(inner: &mut FakeLvmInner) -> Result<()> {
        match inner.fail_next.take() {
            Some(FailMode::Transient(message)) => Err(Error::Transient(message)),
            Some(FailMode::Fatal { code, message }) => Err(Error::Fatal { code, message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LvmService for FakeLvm {
    async fn create_lv(&self, name: &str, _device_class: &str, size_bytes: u64) -> Result<LvInfo> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        inner.create_calls += 1;
        let info = inner
            .lvs
            .entry(name.to_string())
            .or_insert_with(|| LvInfo {
                volume_id: format!("lv-{name}"),
                size_bytes,
            })
            .clone();
        Ok(info)
    }

    async fn resize_lv(&self, volume_id: &str, size_bytes: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        inner.resize_calls += 1;
        let lv = inner
            .lvs
            .values_mut()
            .find(|lv| lv.volume_id == volume_id)
            .ok_or_else(|| Error::Transient(format!("no such volume: {volume_id}")))?;
        if size_bytes < lv.size_bytes {
            return Err(Error::InvalidState(format!(
                "refusing to shrink {volume_id} from {} to {size_bytes}",
                lv.size_bytes
            )));
        }
        lv.size_bytes = size_bytes;
        Ok(())
    }

    async fn remove_lv(&self, volume_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        inner.remove_calls += 1;
        inner.lvs.retain(|_, lv| lv.volume_id != volume_id);
        Ok(())
    }

    async fn get_lv(&self, volume_id: &str) -> Result<Option<LvInfo>> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        Ok(inner
            .lvs
            .values()
            .find(|lv| lv.volume_id == volume_id)
            .cloned())
    }
}
