//! Prometheus instruments
//!
//! Counters are created unregistered so components can be built freely,
//! tests included; each process registers its own [`Metrics`] instance
//! with the default registry before serving scrapes. Cloning shares the
//! underlying counters.

use crate::error::{Error, Result};
use prometheus::IntCounter;

/// Counters shared across the operator's components.
#[derive(Clone)]
pub struct Metrics {
    /// Node removals fully unwound by the coordinator.
    pub node_cleanups: IntCounter,
    /// Reconcile passes that ended in an error, transient or fatal.
    pub reconcile_errors: IntCounter,
    /// Backing volumes successfully grown.
    pub resizes: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            node_cleanups: Self::counter(
                "lvm_csi_node_cleanups_total",
                "Total number of node removal cleanups performed",
            )?,
            reconcile_errors: Self::counter(
                "lvm_csi_reconcile_errors_total",
                "Total number of reconcile passes that failed",
            )?,
            resizes: Self::counter(
                "lvm_csi_resizes_total",
                "Total number of backing volume grow operations",
            )?,
        })
    }

    /// Register every counter with the process-wide default registry.
    pub fn register(&self) -> Result<()> {
        let registry = prometheus::default_registry();
        for counter in [&self.node_cleanups, &self.reconcile_errors, &self.resizes] {
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| Error::Internal(format!("metric registration failed: {e}")))?;
        }
        Ok(())
    }

    fn counter(name: &str, help: &str) -> Result<IntCounter> {
        IntCounter::new(name, help)
            .map_err(|e| Error::Internal(format!("metric creation failed: {e}")))
    }
}
