//! Discovery and status probes across a live fleet.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p svcb-e2e --test discovery
//! ```

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use svcb_node::NodeConfig;
use svcb_testing::{node_config, provisioner_config, Fleet};
use tower::ServiceExt;

#[tokio::test]
async fn test_node_serves_varz_and_healthz() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(node_config("free")).await;
    let app = svcb_node::status::router(node.clone());

    let response = app
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"ok\n");

    let response = app
        .oneshot(Request::get("/varz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let varz: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(varz["node_id"], node.node_id().to_string());
    assert_eq!(varz["counters"]["varz"], 1);

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_announces_for_its_own_plan_only() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet.spawn_node(node_config("free")).await;

    let free = fleet.provisioner.discover("free").await.unwrap();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].node_id, node.node_id());
    assert_eq!(free[0].capacity, 200);

    let nonfree = fleet.provisioner.discover("nonfree").await.unwrap();
    assert!(nonfree.is_empty());

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_not_ready_node_never_discovered() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let node = fleet
        .spawn_node(NodeConfig {
            ready: false,
            ..node_config("free")
        })
        .await;

    for plan in ["free", "nonfree"] {
        assert!(fleet.provisioner.discover(plan).await.unwrap().is_empty());
    }
    assert!(fleet.provisioner.node(&node.node_id()).await.is_none());

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_discovery_aggregates_every_matching_node() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    for _ in 0..3 {
        fleet.spawn_node(node_config("free")).await;
    }
    fleet.spawn_node(node_config("nonfree")).await;

    assert_eq!(fleet.provisioner.discover("free").await.unwrap().len(), 3);
    assert_eq!(fleet.provisioner.discover("nonfree").await.unwrap().len(), 1);
    assert_eq!(fleet.provisioner.nodes().await.len(), 4);

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_stopped_node_drops_out_of_discovery() {
    let mut fleet = Fleet::new(provisioner_config()).await;
    let keep = fleet.spawn_node(node_config("free")).await;
    let gone = fleet.spawn_node(node_config("free")).await;

    fleet.stop_node(gone.node_id()).await;

    let found = fleet.provisioner.discover("free").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].node_id, keep.node_id());

    fleet.shutdown().await;
}
