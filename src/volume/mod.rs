//! Volume lifecycle
//!
//! Owns the reconciliation of a LogicalVolume's declared spec against the
//! actual backing state on the owning node: provisioning, size growth,
//! and finalizer-gated deletion.

mod lvm;
mod reconciler;
mod store;

pub use lvm::{LvInfo, LvmService, LvmServiceRef};
pub use reconciler::VolumeStateMachine;
pub use store::{KubeVolumeStore, VolumeStore, VolumeStoreRef};

#[cfg(test)]
pub(crate) use store::ensure_owner;
