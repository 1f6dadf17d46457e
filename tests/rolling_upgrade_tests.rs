//! # Node Pool Rolling Upgrade Tests
//!
//! Drives the node pool reconciler pass by pass against an in-memory Azure
//! subscription and tenant cluster, the way the controller would after
//! every requeue.

mod common;

use azure_cluster_operator::constants::{
    AUTOSCALER_ENABLED_TAG, AUTOSCALER_MAX_TAG, AUTOSCALER_MIN_TAG,
};
use azure_cluster_operator::controller::{Context, NODE_POOL_MACHINE};
use azure_cluster_operator::crd::AzureNodePool;
use azure_cluster_operator::statemachine::NextAction;
use azure_cluster_operator::status::{MemoryStatusStore, TargetRef};
use common::{
    context, history_of, node_pool, ready_of, state_of, CloudEvent, FakeCloud, NODE_POOL,
};
use std::sync::Arc;

const SCALE_SET: &str = "nodepool-np01";
const MAX_PASSES: usize = 30;

struct Harness {
    cloud: FakeCloud,
    store: Arc<MemoryStatusStore>,
    ctx: Context,
}

impl Harness {
    fn new() -> Self {
        let cloud = FakeCloud::new();
        let store = Arc::new(MemoryStatusStore::new());
        let ctx = context(&cloud, &store);
        Self { cloud, store, ctx }
    }

    async fn pass(&self, pool: &AzureNodePool) -> NextAction {
        let next = self
            .ctx
            .node_pools
            .ensure_created(pool)
            .await
            .expect("node pool pass failed");
        self.cloud.complete_drains();
        next
    }

    /// Run passes until two in a row end in the same state
    async fn settle(&self, pool: &AzureNodePool) -> usize {
        let mut previous = None;
        for passes in 1..=MAX_PASSES {
            let next = self.pass(pool).await;
            let state = self.state(pool);
            if next == NextAction::Continue && previous.as_ref() == Some(&state) {
                return passes;
            }
            previous = (next == NextAction::Continue).then_some(state);
        }
        panic!("node pool did not settle within {MAX_PASSES} passes");
    }

    fn state(&self, pool: &AzureNodePool) -> Option<String> {
        state_of(&self.store, &TargetRef::of(pool), NODE_POOL_MACHINE)
    }
}

fn position(events: &[CloudEvent], matches: impl Fn(&CloudEvent) -> bool) -> usize {
    events
        .iter()
        .position(matches)
        .expect("expected event was not observed")
}

#[tokio::test]
async fn test_new_pool_is_provisioned_and_ready() {
    let harness = Harness::new();
    let pool = node_pool("14.1.0", 3);

    harness.settle(&pool).await;

    let scale_set = harness.cloud.scale_set(SCALE_SET).expect("scale set created");
    assert_eq!(scale_set.capacity, 3);
    assert_eq!(scale_set.storage, "Premium_LRS");
    assert!(scale_set.accelerated);
    assert_eq!(harness.cloud.releases(SCALE_SET), vec!["14.1.0"; 3]);
    assert_eq!(ready_of(&harness.store, &TargetRef::of(&pool)).as_deref(), Some("True"));
    assert!(history_of(&harness.store, &TargetRef::of(&pool), NODE_POOL_MACHINE).is_empty());
    assert!(harness.cloud.world().failed_instance_sweeps >= 1);
}

#[tokio::test]
async fn test_release_change_surges_before_terminating_old_workers() {
    let harness = Harness::new();
    harness.settle(&node_pool("14.1.0", 3)).await;

    let pool = node_pool("15.0.0", 3);
    harness.settle(&pool).await;

    let target = TargetRef::of(&pool);
    assert_eq!(
        history_of(&harness.store, &target, NODE_POOL_MACHINE),
        vec![
            "ScaleUpWorkerVMSS",
            "CordonOldWorkers",
            "WaitForWorkersToBecomeReady",
            "DrainOldWorkerNodes",
            "TerminateOldWorkerInstances",
            "ScaleDownWorkerVMSS",
            "DeploymentUninitialized",
        ]
    );

    let events = harness.cloud.events();
    let autoscaler_off = position(&events, |e| {
        matches!(e, CloudEvent::AutoscalerTag { enabled, .. } if enabled.as_deref() == Some("false"))
    });
    let surge = position(&events, |e| {
        matches!(e, CloudEvent::Capacity { capacity: 6, .. })
    });
    let terminated = position(&events, |e| matches!(e, CloudEvent::InstancesDeleted { .. }));
    let autoscaler_on = position(&events, |e| {
        matches!(e, CloudEvent::AutoscalerTag { enabled, .. } if enabled.as_deref() == Some("true"))
    });
    assert!(autoscaler_off < surge);
    assert!(surge < terminated);
    assert!(terminated < autoscaler_on);

    let cordoned: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            CloudEvent::Cordoned { node } => Some(node.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        cordoned,
        vec!["nodepool-np01000000", "nodepool-np01000001", "nodepool-np01000002"]
    );
    assert_eq!(
        events[..terminated]
            .iter()
            .filter(|e| matches!(e, CloudEvent::Cordoned { .. }))
            .count(),
        3
    );
    assert_eq!(
        events[terminated],
        CloudEvent::InstancesDeleted {
            vmss: SCALE_SET.to_string(),
            ids: vec!["0".to_string(), "1".to_string(), "2".to_string()],
        }
    );
    assert!(events
        .iter()
        .all(|e| !matches!(e, CloudEvent::Capacity { capacity, .. } if *capacity > 6)));

    let scale_set = harness.cloud.scale_set(SCALE_SET).expect("scale set kept");
    assert_eq!(scale_set.capacity, 3);
    assert_eq!(harness.cloud.releases(SCALE_SET), vec!["15.0.0"; 3]);
    assert_eq!(
        scale_set.tags.get(AUTOSCALER_ENABLED_TAG).map(String::as_str),
        Some("true")
    );
    assert_eq!(scale_set.tags.get(AUTOSCALER_MIN_TAG).map(String::as_str), Some("3"));
    assert_eq!(scale_set.tags.get(AUTOSCALER_MAX_TAG).map(String::as_str), Some("5"));
    assert!(harness.cloud.world().drains.is_empty());
    assert_eq!(ready_of(&harness.store, &target).as_deref(), Some("True"));
}

#[tokio::test]
async fn test_release_change_survives_a_lost_checksum_write() {
    let harness = Harness::new();
    harness.settle(&node_pool("14.1.0", 3)).await;

    let pool = node_pool("15.0.0", 3);
    harness.store.inject_conflicts(1);
    let next = harness.pass(&pool).await;
    assert_eq!(next, NextAction::Continue);
    assert!(history_of(&harness.store, &TargetRef::of(&pool), NODE_POOL_MACHINE).is_empty());

    harness.settle(&pool).await;

    let history = history_of(&harness.store, &TargetRef::of(&pool), NODE_POOL_MACHINE);
    assert_eq!(history.first().map(String::as_str), Some("ScaleUpWorkerVMSS"));
    assert_eq!(harness.cloud.releases(SCALE_SET), vec!["15.0.0"; 3]);
    assert_eq!(harness.state(&pool).as_deref(), Some("DeploymentUninitialized"));
}

#[tokio::test]
async fn test_every_drain_completes_before_termination() {
    let harness = Harness::new();
    harness.settle(&node_pool("14.1.0", 2)).await;
    let pool = node_pool("15.0.0", 2);

    let mut drains_seen = 0;
    for _ in 0..MAX_PASSES {
        let before = harness.state(&pool);
        harness
            .ctx
            .node_pools
            .ensure_created(&pool)
            .await
            .expect("node pool pass failed");
        let requested = harness.cloud.world().drains.len();
        drains_seen = drains_seen.max(requested);
        if before.as_deref() == Some("DrainOldWorkerNodes") && requested > 0 {
            assert_eq!(harness.state(&pool).as_deref(), Some("DrainOldWorkerNodes"));
            assert!(!harness
                .cloud
                .events()
                .iter()
                .any(|e| matches!(e, CloudEvent::InstancesDeleted { .. })));
            harness.cloud.complete_drains();
        }
        if harness.state(&pool).as_deref() == Some("DeploymentUninitialized") {
            break;
        }
    }

    assert_eq!(drains_seen, 2);
    assert_eq!(harness.cloud.releases(SCALE_SET), vec!["15.0.0"; 2]);
}

#[tokio::test]
async fn test_replica_change_resizes_without_rollout() {
    let harness = Harness::new();
    harness.settle(&node_pool("14.1.0", 3)).await;

    let pool = node_pool("14.1.0", 5);
    harness.settle(&pool).await;

    assert!(history_of(&harness.store, &TargetRef::of(&pool), NODE_POOL_MACHINE).is_empty());
    assert_eq!(harness.cloud.releases(SCALE_SET), vec!["14.1.0"; 5]);
    assert!(!harness
        .cloud
        .events()
        .iter()
        .any(|e| matches!(e, CloudEvent::Cordoned { .. })));
}

#[tokio::test]
async fn test_deleting_pool_removes_its_azure_resources_and_drains() {
    let harness = Harness::new();
    let pool = node_pool("14.1.0", 2);
    harness.settle(&pool).await;
    harness
        .cloud
        .world()
        .drains
        .insert("leftover".to_string(), {
            let mut request = azure_cluster_operator::kubernetes::new_drain_request(
                common::CLUSTER_ID,
                NODE_POOL,
                "nodepool-np01000000",
                std::time::Duration::from_secs(600),
            );
            request.metadata.namespace = Some(common::NAMESPACE.to_string());
            request
        });

    harness
        .ctx
        .node_pools
        .ensure_deleted(&pool)
        .await
        .expect("node pool deletion failed");

    let world = harness.cloud.world();
    assert!(world.deployments.is_empty());
    assert!(!world.scale_sets.contains_key(SCALE_SET));
    assert!(world.drains.is_empty());
}
