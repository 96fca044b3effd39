//! Orphan check and purge end to end.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p svcb-e2e --test orphans
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use rstest::rstest;
use serde_json::json;
use svcb_capacity::OrphanSet;
use svcb_node::NodeConfig;
use svcb_provisioner::{ProvisionerConfig, PurgeSelection};
use svcb_testing::{node_config, provisioner_config, Fleet};

fn seeded(instances: usize, bindings: usize) -> NodeConfig {
    NodeConfig {
        seed_instances: instances,
        seed_bindings: bindings,
        ..node_config("free")
    }
}

#[tokio::test]
async fn test_empty_node_reports_nothing() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(node_config("free")).await;

    let check = fleet.provisioner.check_orphan(&[]).await.unwrap();

    assert_eq!(check.responded, vec![node.node_id()]);
    assert!(check.orphans.is_empty());
    assert!(fleet
        .provisioner
        .reported_instances(&node.node_id())
        .await
        .is_empty());
    assert!(fleet
        .provisioner
        .reported_bindings(&node.node_id())
        .await
        .is_empty());
    fleet.shutdown().await;
}

#[rstest]
#[case::many_instances(131_072, 1_024)]
#[case::many_bindings(1_024, 65_536)]
#[case::both(131_072, 16_384)]
#[tokio::test]
async fn test_large_inventories_are_not_truncated(#[case] instances: usize, #[case] bindings: usize) {
    let config = ProvisionerConfig {
        orphan_window: Duration::from_secs(5),
        ..provisioner_config()
    };
    let mut fleet = Fleet::new(config).await;
    let node = fleet.spawn_node(seeded(instances, bindings)).await;

    let check = fleet.provisioner.check_orphan(&[]).await.unwrap();

    assert_eq!(check.responded, vec![node.node_id()]);
    let reported_instances = fleet.provisioner.reported_instances(&node.node_id()).await;
    let reported_bindings = fleet.provisioner.reported_bindings(&node.node_id()).await;
    assert_eq!(reported_instances.len(), instances);
    assert_eq!(reported_bindings.len(), bindings);

    let staged = &check.orphans[&node.node_id()];
    assert_eq!(staged.instance_ids.len(), instances);
    assert_eq!(staged.binding_ids.len(), bindings);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_recorded_instances_are_not_orphans() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(seeded(3, 0)).await;
    fleet.provisioner.discover("free").await.unwrap();
    let mine = fleet.provisioner.provision("free", json!({})).await.unwrap();

    let check = fleet.provisioner.check_orphan(&[]).await.unwrap();

    assert_eq!(
        fleet.provisioner.reported_instances(&node.node_id()).await.len(),
        4
    );
    let staged = &check.orphans[&node.node_id()];
    assert_eq!(staged.instance_ids.len(), 3);
    assert!(!staged.instance_ids.contains(&mine.name));
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_purge_removes_staged_orphans() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(seeded(2, 2)).await;
    fleet.provisioner.check_orphan(&[]).await.unwrap();

    let summary = fleet
        .provisioner
        .purge_orphan(PurgeSelection::Staged)
        .await
        .unwrap();

    assert_eq!(summary.unprovision_count(), 2);
    assert_eq!(summary.unbind_count(), 2);
    assert!(summary.failed.is_empty());

    let snapshot = node.snapshot().await.unwrap();
    assert_eq!(snapshot.counters.unprovision, 2);
    assert_eq!(snapshot.counters.unbind, 2);
    assert_eq!(snapshot.instance_count, 0);
    assert_eq!(snapshot.binding_count, 0);

    assert!(fleet
        .provisioner
        .reported_instances(&node.node_id())
        .await
        .is_empty());
    assert!(fleet.provisioner.staged_orphans().await.is_empty());
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_explicit_purge_touches_only_the_listed_ids() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(seeded(3, 0)).await;
    let check = fleet.provisioner.check_orphan(&[]).await.unwrap();
    let target = check.orphans[&node.node_id()].instance_ids[0];

    let selection = BTreeMap::from([(
        node.node_id(),
        OrphanSet {
            instance_ids: vec![target],
            binding_ids: vec![],
        },
    )]);
    let summary = fleet
        .provisioner
        .purge_orphan(PurgeSelection::Explicit(selection))
        .await
        .unwrap();

    assert_eq!(summary.unprovision_count(), 1);
    assert_eq!(node.snapshot().await.unwrap().instance_count, 2);
    let staged = fleet.provisioner.staged_orphans().await;
    assert_eq!(staged[&node.node_id()].instance_ids.len(), 2);
    assert!(!staged[&node.node_id()].instance_ids.contains(&target));
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_purging_an_instance_drains_its_bindings() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(seeded(1, 1)).await;
    let check = fleet.provisioner.check_orphan(&[]).await.unwrap();
    let instance_id = check.orphans[&node.node_id()].instance_ids[0];

    let selection = BTreeMap::from([(
        node.node_id(),
        OrphanSet {
            instance_ids: vec![instance_id],
            binding_ids: vec![],
        },
    )]);
    let summary = fleet
        .provisioner
        .purge_orphan(PurgeSelection::Explicit(selection))
        .await
        .unwrap();

    assert_eq!(summary.reports[&node.node_id()].cascaded_bindings.len(), 1);
    assert_eq!(node.snapshot().await.unwrap().binding_count, 0);
    assert!(fleet
        .provisioner
        .reported_bindings(&node.node_id())
        .await
        .is_empty());
    assert!(fleet.provisioner.staged_orphans().await.is_empty());

    let again = fleet
        .provisioner
        .purge_orphan(PurgeSelection::Staged)
        .await
        .unwrap();
    assert!(again.reports.is_empty());
    assert_eq!(node.snapshot().await.unwrap().counters.unbind, 0);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_silent_node_keeps_its_previous_entry() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(seeded(4, 1)).await;
    fleet.provisioner.check_orphan(&[]).await.unwrap();

    fleet.stop_node(node.node_id()).await;
    let check = fleet.provisioner.check_orphan(&[]).await.unwrap();

    assert!(check.responded.is_empty());
    assert_eq!(
        fleet.provisioner.reported_instances(&node.node_id()).await.len(),
        4
    );
    assert_eq!(check.orphans[&node.node_id()].binding_ids.len(), 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_check_can_target_specific_nodes() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let asked = fleet.spawn_node(seeded(1, 0)).await;
    let skipped = fleet.spawn_node(seeded(1, 0)).await;

    let check = fleet
        .provisioner
        .check_orphan(&[asked.node_id()])
        .await
        .unwrap();

    assert_eq!(check.responded, vec![asked.node_id()]);
    assert!(fleet
        .provisioner
        .reported_instances(&skipped.node_id())
        .await
        .is_empty());
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_purge_with_nothing_staged_sends_nothing() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(node_config("free")).await;

    let summary = fleet
        .provisioner
        .purge_orphan(PurgeSelection::Staged)
        .await
        .unwrap();

    assert!(summary.reports.is_empty());
    assert_eq!(node.snapshot().await.unwrap().counters.unprovision, 0);
    fleet.shutdown().await;
}
