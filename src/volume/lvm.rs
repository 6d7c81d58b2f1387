//! Port for the node-local volume manager
//!
//! The actual LVM commands run in a separate on-node daemon; this trait
//! is the contract the state machine drives it through. All operations
//! are idempotent so a crashed-and-restarted reconcile pass can safely
//! re-issue them.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Observed state of a backing logical volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvInfo {
    /// Stable backing volume identifier
    pub volume_id: String,
    /// Actual size of the backing volume in bytes
    pub size_bytes: u64,
}

/// Port for node-local volume manager operations
#[async_trait]
pub trait LvmService: Send + Sync {
    /// Create a logical volume. If a volume for `name` already exists it
    /// is returned as-is rather than failing, so retries converge.
    async fn create_lv(&self, name: &str, device_class: &str, size_bytes: u64) -> Result<LvInfo>;

    /// Grow an existing volume to exactly `size_bytes`. Never shrinks.
    async fn resize_lv(&self, volume_id: &str, size_bytes: u64) -> Result<()>;

    /// Remove a volume. An already-absent volume is success, not an error.
    async fn remove_lv(&self, volume_id: &str) -> Result<()>;

    /// Look up a volume's observed state; `Ok(None)` if it does not exist
    async fn get_lv(&self, volume_id: &str) -> Result<Option<LvInfo>>;
}

pub type LvmServiceRef = Arc<dyn LvmService>;
