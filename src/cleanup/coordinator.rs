//! Node removal coordinator
//!
//! Forces terminal cleanup of everything a removed node owned. The
//! owning node's agent cannot run anymore, so finalizers are removed
//! through this administrative path instead. Releasing a claim races
//! with the workload controller recreating it; both sides converge on
//! their own, no ordering is assumed between them.

use crate::capacity::NodeInfo;
use crate::cleanup::ClusterJanitorRef;
use crate::config::Config;
use crate::crd::{ANN_SKIP_NODE_FINALIZE, NODE_FINALIZER};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::volume::VolumeStoreRef;
use tracing::{debug, info};

/// Unwinds volumes, claims and pods owned by a node that left the cluster
pub struct NodeRemovalCoordinator {
    volumes: VolumeStoreRef,
    janitor: ClusterJanitorRef,
    skip_finalize_nodes: Vec<String>,
    cleanups: prometheus::IntCounter,
}

impl NodeRemovalCoordinator {
    pub fn new(
        config: &Config,
        volumes: VolumeStoreRef,
        janitor: ClusterJanitorRef,
        metrics: &Metrics,
    ) -> Self {
        Self {
            volumes,
            janitor,
            skip_finalize_nodes: config.skip_finalize_nodes.clone(),
            cleanups: metrics.node_cleanups.clone(),
        }
    }

    fn finalize_skipped(&self, node: &NodeInfo) -> bool {
        self.skip_finalize_nodes.iter().any(|n| *n == node.name)
            || node
                .annotations
                .get(ANN_SKIP_NODE_FINALIZE)
                .map(|v| v == "true")
                .unwrap_or(false)
    }

    /// Handle a node that is being removed from the cluster. Idempotent;
    /// safe to re-run and safe to interleave with a still-live agent's
    /// own finalization of the same resources.
    pub async fn handle_node_removal(&self, node: &NodeInfo) -> Result<()> {
        if !node.finalizers.iter().any(|f| f == NODE_FINALIZER) {
            debug!(node = %node.name, "no node finalizer present, nothing to clean up");
            return Ok(());
        }
        if self.finalize_skipped(node) {
            // Explicit escape hatch for manual intervention: leave the
            // finalizer and all dependent resources untouched, even
            // though they stay stuck.
            info!(node = %node.name, "node finalization skipped by configuration");
            return Ok(());
        }

        for lv in self.volumes.list_by_node(&node.name).await? {
            info!(node = %node.name, volume = lv.name(), "force-finalizing logical volume");
            self.volumes.delete(lv.name()).await?;
            // The node agent is gone; remove its finalizer on its behalf.
            // Removing an already-absent token is a no-op, so this is
            // safe if the agent got there first.
            self.volumes.remove_finalizer(lv.name()).await?;
        }

        for claim in self.janitor.claims_on_node(&node.name).await? {
            let pods = self.janitor.pods_using_claim(&claim).await?;
            info!(
                node = %node.name,
                claim = %claim.name,
                namespace = %claim.namespace,
                pods = pods.len(),
                "releasing claim and dependent pods"
            );
            self.janitor.delete_claim(&claim).await?;
            for pod in pods {
                self.janitor.delete_pod(&pod).await?;
            }
        }

        self.janitor.remove_node_finalizer(&node.name).await?;
        self.cleanups.inc();
        info!(node = %node.name, "node cleanup complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::{ClaimRef, ClusterJanitor, PodRef};
    use crate::crd::{LogicalVolume, LogicalVolumeSpec, LOGICAL_VOLUME_FINALIZER};
    use crate::testutil::InMemoryVolumeStore;
    use crate::volume::VolumeStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct ClaimRec {
        uid: u64,
        selected_node: Option<String>,
    }

    #[derive(Debug, Clone)]
    struct PodRec {
        uid: u64,
        node: String,
        claim: String,
    }

    #[derive(Default)]
    struct ClusterState {
        next_uid: u64,
        claims: BTreeMap<String, ClaimRec>,
        pods: BTreeMap<String, PodRec>,
        node_finalizers: BTreeMap<String, Vec<String>>,
    }

    impl ClusterState {
        fn uid(&mut self) -> u64 {
            self.next_uid += 1;
            self.next_uid
        }
    }

    /// Fake cluster that also plays the workload controller: deleted
    /// claims and pods are immediately recreated with a new identity on
    /// a surviving node, interleaved with the coordinator's own calls.
    #[derive(Default)]
    struct FakeCluster {
        inner: Mutex<ClusterState>,
    }

    const SURVIVOR: &str = "worker-1";

    impl FakeCluster {
        fn add_claim(&self, name: &str, node: &str) -> u64 {
            let mut s = self.inner.lock();
            let uid = s.uid();
            s.claims.insert(
                name.to_string(),
                ClaimRec {
                    uid,
                    selected_node: Some(node.to_string()),
                },
            );
            uid
        }

        fn add_pod(&self, name: &str, node: &str, claim: &str) -> u64 {
            let mut s = self.inner.lock();
            let uid = s.uid();
            s.pods.insert(
                name.to_string(),
                PodRec {
                    uid,
                    node: node.to_string(),
                    claim: claim.to_string(),
                },
            );
            uid
        }

        fn add_node(&self, name: &str) {
            self.inner
                .lock()
                .node_finalizers
                .insert(name.to_string(), vec![NODE_FINALIZER.to_string()]);
        }

        fn claim_uid(&self, name: &str) -> Option<u64> {
            self.inner.lock().claims.get(name).map(|c| c.uid)
        }

        fn pod(&self, name: &str) -> Option<PodRec> {
            self.inner.lock().pods.get(name).cloned()
        }

        fn node_finalizers(&self, name: &str) -> Vec<String> {
            self.inner
                .lock()
                .node_finalizers
                .get(name)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ClusterJanitor for FakeCluster {
        async fn claims_on_node(&self, node_name: &str) -> crate::error::Result<Vec<ClaimRef>> {
            Ok(self
                .inner
                .lock()
                .claims
                .iter()
                .filter(|(_, c)| c.selected_node.as_deref() == Some(node_name))
                .map(|(name, _)| ClaimRef {
                    namespace: "default".into(),
                    name: name.clone(),
                })
                .collect())
        }

        async fn pods_using_claim(&self, claim: &ClaimRef) -> crate::error::Result<Vec<PodRef>> {
            Ok(self
                .inner
                .lock()
                .pods
                .iter()
                .filter(|(_, p)| p.claim == claim.name)
                .map(|(name, _)| PodRef {
                    namespace: "default".into(),
                    name: name.clone(),
                })
                .collect())
        }

        async fn delete_claim(&self, claim: &ClaimRef) -> crate::error::Result<()> {
            let mut s = self.inner.lock();
            if s.claims.remove(&claim.name).is_some() {
                // Workload controller recreates the claim with a fresh
                // identity, rescheduled to a surviving node.
                let uid = s.uid();
                s.claims.insert(
                    claim.name.clone(),
                    ClaimRec {
                        uid,
                        selected_node: Some(SURVIVOR.to_string()),
                    },
                );
            }
            Ok(())
        }

        async fn delete_pod(&self, pod: &PodRef) -> crate::error::Result<()> {
            let mut s = self.inner.lock();
            if let Some(old) = s.pods.remove(&pod.name) {
                let uid = s.uid();
                s.pods.insert(
                    pod.name.clone(),
                    PodRec {
                        uid,
                        node: SURVIVOR.to_string(),
                        claim: old.claim,
                    },
                );
            }
            Ok(())
        }

        async fn remove_node_finalizer(&self, node_name: &str) -> crate::error::Result<()> {
            if let Some(finalizers) = self.inner.lock().node_finalizers.get_mut(node_name) {
                finalizers.retain(|f| f != NODE_FINALIZER);
            }
            Ok(())
        }
    }

    const GIB: u64 = 1024 * 1024 * 1024;

    struct Fixture {
        store: Arc<InMemoryVolumeStore>,
        cluster: Arc<FakeCluster>,
        metrics: Metrics,
    }

    fn coordinator(config: Config) -> (NodeRemovalCoordinator, Fixture) {
        let store = Arc::new(InMemoryVolumeStore::default());
        let cluster = Arc::new(FakeCluster::default());
        let metrics = Metrics::new().unwrap();
        let c = NodeRemovalCoordinator::new(&config, store.clone(), cluster.clone(), &metrics);
        (
            c,
            Fixture {
                store,
                cluster,
                metrics,
            },
        )
    }

    async fn seed_volume(store: &InMemoryVolumeStore, name: &str, node: &str) {
        let mut lv = LogicalVolume::new(
            name,
            LogicalVolumeSpec {
                node_name: node.into(),
                device_class: "ssd".into(),
                size_bytes: GIB,
            },
        );
        lv.metadata.finalizers = Some(vec![LOGICAL_VOLUME_FINALIZER.into()]);
        store.create(&lv).await.unwrap();
    }

    fn removed_node(name: &str) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            finalizers: vec![NODE_FINALIZER.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_removal_purges_volumes_and_recreates_dependents() {
        let (c, f) = coordinator(Config::default());
        seed_volume(&f.store, "pvc-a", "worker-3").await;
        seed_volume(&f.store, "pvc-b", "worker-3").await;
        seed_volume(&f.store, "pvc-other", "worker-1").await;
        f.cluster.add_node("worker-3");
        let claim_uid = f.cluster.add_claim("data-sts-0", "worker-3");
        let pod_uid = f.cluster.add_pod("sts-0", "worker-3", "data-sts-0");

        c.handle_node_removal(&removed_node("worker-3")).await.unwrap();

        // Volumes on the removed node are purged; others are untouched.
        assert!(f.store.get("pvc-a").await.unwrap().is_none());
        assert!(f.store.get("pvc-b").await.unwrap().is_none());
        assert!(f.store.get("pvc-other").await.unwrap().is_some());

        // Claim and pod exist again with new identity on another node.
        let new_claim_uid = f.cluster.claim_uid("data-sts-0").unwrap();
        assert_ne!(new_claim_uid, claim_uid);
        let pod = f.cluster.pod("sts-0").unwrap();
        assert_ne!(pod.uid, pod_uid);
        assert_eq!(pod.node, SURVIVOR);

        // Node finalizer released and the cleanup counted.
        assert!(f.cluster.node_finalizers("worker-3").is_empty());
        assert_eq!(f.metrics.node_cleanups.get(), 1);
    }

    #[tokio::test]
    async fn test_removal_is_idempotent() {
        let (c, f) = coordinator(Config::default());
        seed_volume(&f.store, "pvc-a", "worker-3").await;
        f.cluster.add_node("worker-3");
        f.cluster.add_claim("data-sts-0", "worker-3");

        c.handle_node_removal(&removed_node("worker-3")).await.unwrap();
        let uid_after_first = f.cluster.claim_uid("data-sts-0").unwrap();

        // Second run finds nothing left to release: the recreated claim
        // now points at a surviving node.
        c.handle_node_removal(&removed_node("worker-3")).await.unwrap();
        assert_eq!(f.cluster.claim_uid("data-sts-0").unwrap(), uid_after_first);
    }

    #[tokio::test]
    async fn test_skip_flag_via_config_leaves_everything_stuck() {
        let config = Config {
            skip_finalize_nodes: vec!["worker-3".into()],
            ..Config::default()
        };
        let (c, f) = coordinator(config);
        seed_volume(&f.store, "pvc-a", "worker-3").await;
        f.cluster.add_node("worker-3");
        let claim_uid = f.cluster.add_claim("data-sts-0", "worker-3");
        let pod_uid = f.cluster.add_pod("sts-0", "worker-3", "data-sts-0");

        c.handle_node_removal(&removed_node("worker-3")).await.unwrap();

        assert!(f.store.get("pvc-a").await.unwrap().is_some());
        assert_eq!(f.cluster.claim_uid("data-sts-0"), Some(claim_uid));
        assert_eq!(f.cluster.pod("sts-0").unwrap().uid, pod_uid);
        assert_eq!(
            f.cluster.node_finalizers("worker-3"),
            vec![NODE_FINALIZER.to_string()]
        );
        assert_eq!(f.metrics.node_cleanups.get(), 0);
    }

    #[tokio::test]
    async fn test_skip_flag_via_node_annotation() {
        let (c, f) = coordinator(Config::default());
        seed_volume(&f.store, "pvc-a", "worker-3").await;
        f.cluster.add_node("worker-3");

        let mut node = removed_node("worker-3");
        node.annotations
            .insert(ANN_SKIP_NODE_FINALIZE.to_string(), "true".to_string());

        c.handle_node_removal(&node).await.unwrap();
        assert!(f.store.get("pvc-a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_node_without_finalizer_is_ignored() {
        let (c, f) = coordinator(Config::default());
        seed_volume(&f.store, "pvc-a", "worker-3").await;

        let node = NodeInfo {
            name: "worker-3".into(),
            ..Default::default()
        };
        c.handle_node_removal(&node).await.unwrap();
        assert!(f.store.get("pvc-a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_interleaving_with_live_agent_finalization() {
        let (c, f) = coordinator(Config::default());
        seed_volume(&f.store, "pvc-a", "worker-3").await;
        f.cluster.add_node("worker-3");

        // The agent finished its own finalization just before the
        // coordinator ran; removing the absent token is a no-op.
        f.store.delete("pvc-a").await.unwrap();
        f.store.remove_finalizer("pvc-a").await.unwrap();
        assert!(f.store.get("pvc-a").await.unwrap().is_none());

        c.handle_node_removal(&removed_node("worker-3")).await.unwrap();
        assert!(f.cluster.node_finalizers("worker-3").is_empty());
    }
}
