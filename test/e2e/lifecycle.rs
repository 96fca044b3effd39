//! Lifecycle operations end to end: capacity accounting and fault surfacing.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p svcb-e2e --test lifecycle
//! ```

use rstest::rstest;
use serde_json::json;
use svcb_id::InstanceId;
use svcb_node::{NodeClient, NodeConfig};
use svcb_proto::OperationKind;
use svcb_provisioner::BrokerError;
use svcb_testing::{node_config, provisioner_config, Fleet};
use tokio::task::JoinSet;

/// A fleet with one healthy node, already discovered.
async fn fleet_with_node(plan: &str) -> (Fleet, NodeClient) {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(node_config(plan)).await;
    fleet.provisioner.discover(plan).await.unwrap();
    (fleet, node)
}

/// A fleet with one faulting node holding one instance and one binding the
/// provisioner has learned about through an orphan check.
async fn fleet_with_error_node() -> (Fleet, NodeClient) {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet
        .spawn_error_node(NodeConfig {
            seed_instances: 1,
            seed_bindings: 1,
            ..node_config("free")
        })
        .await;
    fleet.provisioner.discover("free").await.unwrap();
    fleet.provisioner.check_orphan(&[]).await.unwrap();
    (fleet, node)
}

#[tokio::test]
async fn test_provision_decreases_capacity() {
    let (fleet, node) = fleet_with_node("free").await;
    let before = node.capacity().await.unwrap();

    let credentials = fleet.provisioner.provision("free", json!({})).await.unwrap();

    assert_eq!(credentials.node_id, node.node_id());
    assert!(!credentials.password.is_empty());
    assert_eq!(node.capacity().await.unwrap(), before - 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_unprovision_increases_capacity() {
    let (fleet, node) = fleet_with_node("free").await;
    let credentials = fleet.provisioner.provision("free", json!({})).await.unwrap();
    let before = node.capacity().await.unwrap();

    fleet.provisioner.unprovision(credentials.name).await.unwrap();

    assert_eq!(node.capacity().await.unwrap(), before + 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_migration_consumes_a_slot() {
    let (fleet, node) = fleet_with_node("free").await;
    let credentials = fleet.provisioner.provision("free", json!({})).await.unwrap();
    let before = node.capacity().await.unwrap();

    fleet
        .provisioner
        .update(credentials.name, json!({"version": "2"}))
        .await
        .unwrap();

    assert_eq!(node.capacity().await.unwrap(), before - 1);
    let cached = fleet.provisioner.node(&node.node_id()).await.unwrap();
    assert_eq!(cached.capacity.get(), before - 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_migrated_instance_leaves_a_slot_behind() {
    let (fleet, node) = fleet_with_node("free").await;
    let start = node.capacity().await.unwrap();

    let credentials = fleet.provisioner.provision("free", json!({})).await.unwrap();
    fleet
        .provisioner
        .update(credentials.name, json!({"version": "2"}))
        .await
        .unwrap();
    fleet.provisioner.unprovision(credentials.name).await.unwrap();

    assert_eq!(node.capacity().await.unwrap(), start - 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_bind_ops_leave_capacity_alone() {
    let (fleet, node) = fleet_with_node("free").await;
    let credentials = fleet.provisioner.provision("free", json!({})).await.unwrap();
    let before = node.capacity().await.unwrap();
    let instance_id = credentials.name;

    let binding = fleet.provisioner.bind(instance_id, json!({})).await.unwrap();
    fleet
        .provisioner
        .restore(instance_id, "/backups/latest")
        .await
        .unwrap();
    fleet.provisioner.import(instance_id, "/dumps/1").await.unwrap();
    fleet.provisioner.disable(instance_id).await.unwrap();
    fleet.provisioner.enable(instance_id).await.unwrap();
    fleet
        .provisioner
        .unbind(binding.binding_id.unwrap())
        .await
        .unwrap();

    assert_eq!(node.capacity().await.unwrap(), before);
    let counters = node.snapshot().await.unwrap().counters;
    for kind in [
        OperationKind::Bind,
        OperationKind::Unbind,
        OperationKind::Restore,
        OperationKind::Disable,
        OperationKind::Enable,
        OperationKind::Import,
    ] {
        assert_eq!(counters.get(kind), 1, "{kind}");
    }
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_unprovision_removes_bindings() {
    let (fleet, node) = fleet_with_node("free").await;
    let credentials = fleet.provisioner.provision("free", json!({})).await.unwrap();
    let binding = fleet
        .provisioner
        .bind(credentials.name, json!({}))
        .await
        .unwrap();

    let removed = fleet.provisioner.unprovision(credentials.name).await.unwrap();

    assert_eq!(removed, vec![binding.binding_id.unwrap()]);
    assert_eq!(node.snapshot().await.unwrap().binding_count, 0);
    let err = fleet
        .provisioner
        .unbind(binding.binding_id.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnknownBinding(_)));
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_cleanupnfs_answers() {
    let (fleet, node) = fleet_with_node("free").await;
    let credentials = fleet.provisioner.provision("free", json!({})).await.unwrap();
    let before = node.capacity().await.unwrap();

    let cleaned = fleet.provisioner.cleanup_nfs(credentials.name).await.unwrap();

    assert!(cleaned);
    assert_eq!(node.capacity().await.unwrap(), before);
    assert_eq!(node.snapshot().await.unwrap().counters.cleanupnfs, 1);
    fleet.shutdown().await;
}

#[rstest]
#[case::provision(OperationKind::Provision)]
#[case::unprovision(OperationKind::Unprovision)]
#[case::bind(OperationKind::Bind)]
#[case::unbind(OperationKind::Unbind)]
#[case::restore(OperationKind::Restore)]
#[case::disable(OperationKind::Disable)]
#[case::enable(OperationKind::Enable)]
#[case::import(OperationKind::Import)]
#[case::update(OperationKind::Update)]
#[tokio::test]
async fn test_node_fault_is_service_unavailable(#[case] kind: OperationKind) {
    let (fleet, node) = fleet_with_error_node().await;
    let before = node.capacity().await.unwrap();
    let p = &fleet.provisioner;
    let instance_id = *p.reported_instances(&node.node_id()).await.first().unwrap();
    let binding_id = *p.reported_bindings(&node.node_id()).await.first().unwrap();

    let err = match kind {
        OperationKind::Provision => p.provision("free", json!({})).await.map(|_| ()),
        OperationKind::Unprovision => p.unprovision(instance_id).await.map(|_| ()),
        OperationKind::Bind => p.bind(instance_id, json!({})).await.map(|_| ()),
        OperationKind::Unbind => p.unbind(binding_id).await,
        OperationKind::Restore => p.restore(instance_id, "/backups/latest").await,
        OperationKind::Disable => p.disable(instance_id).await,
        OperationKind::Enable => p.enable(instance_id).await,
        OperationKind::Import => p.import(instance_id, "/dumps/1").await,
        OperationKind::Update => p.update(instance_id, json!({})).await.map(|_| ()),
        other => panic!("not a lifecycle operation: {other}"),
    }
    .unwrap_err();

    assert!(matches!(err, BrokerError::NodeFault { .. }), "{err:?}");
    assert!(err.to_string().starts_with("Service unavailable"), "{err}");

    let snapshot = node.snapshot().await.unwrap();
    assert_eq!(snapshot.capacity, before);
    assert_eq!(snapshot.counters.get(kind), 1);
    assert_eq!(snapshot.instance_count, 1);
    assert_eq!(snapshot.binding_count, 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_cleanupnfs_on_error_node_still_answers() {
    let (fleet, node) = fleet_with_error_node().await;
    let before = node.capacity().await.unwrap();
    let instance_id = *fleet
        .provisioner
        .reported_instances(&node.node_id())
        .await
        .first()
        .unwrap();

    let cleaned = fleet.provisioner.cleanup_nfs(instance_id).await.unwrap();

    assert!(!cleaned);
    assert_eq!(node.capacity().await.unwrap(), before);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_unknown_instance_never_reaches_a_node() {
    let (fleet, node) = fleet_with_node("free").await;

    let err = fleet
        .provisioner
        .restore(InstanceId::new(), "/backups/latest")
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::UnknownInstance(_)));
    assert_eq!(node.snapshot().await.unwrap().counters.restore, 0);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_capacity_runs_out() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet
        .spawn_node(NodeConfig {
            capacity: 2,
            ..node_config("free")
        })
        .await;
    fleet.provisioner.discover("free").await.unwrap();

    for _ in 0..2 {
        fleet.provisioner.provision("free", json!({})).await.unwrap();
    }
    let err = fleet
        .provisioner
        .provision("free", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::NoCapacity { .. }));
    assert_eq!(node.capacity().await.unwrap(), 0);
    assert_eq!(node.snapshot().await.unwrap().counters.provision, 2);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_provisions_never_overcommit() {
    const SLOTS: u32 = 3;
    const REQUESTS: usize = 8;

    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet
        .spawn_node(NodeConfig {
            capacity: SLOTS,
            ..node_config("free")
        })
        .await;
    fleet.provisioner.discover("free").await.unwrap();

    let mut requests = JoinSet::new();
    for _ in 0..REQUESTS {
        let provisioner = fleet.provisioner.clone();
        requests.spawn(async move { provisioner.provision("free", json!({})).await });
    }

    let mut succeeded = 0;
    while let Some(joined) = requests.join_next().await {
        match joined.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(err.to_string().starts_with("Service unavailable"), "{err}"),
        }
    }

    assert_eq!(succeeded, SLOTS);
    assert_eq!(node.capacity().await.unwrap(), 0);
    assert_eq!(node.snapshot().await.unwrap().instance_count, SLOTS as usize);
    fleet.shutdown().await;
}
