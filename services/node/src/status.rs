//! Read-only status probes.
//!
//! - `GET /varz`: JSON snapshot of the node
//! - `GET /healthz`: plain `ok`

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::handle::NodeClient;

/// Create the probe router for one node.
pub fn router(client: NodeClient) -> Router {
    routes()
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

/// Probe routes without middleware, for nesting under another router.
pub fn routes() -> Router<NodeClient> {
    Router::new()
        .route("/varz", get(varz))
        .route("/healthz", get(healthz))
}

async fn varz(State(client): State<NodeClient>) -> impl IntoResponse {
    match client.varz().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok\n"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use svcb_bus::MemoryBus;
    use tower::ServiceExt;

    use super::*;
    use crate::{start, MemoryBackend, NodeConfig};

    async fn node_router() -> (Router, crate::NodeHandle) {
        let config = NodeConfig::for_plan("free");
        let backend = Arc::new(MemoryBackend::new(config.node_id, "localhost"));
        let node = start(config, Arc::new(MemoryBus::new()), backend)
            .await
            .unwrap();
        (router(node.client()), node)
    }

    #[tokio::test]
    async fn test_healthz_is_plain_ok() {
        let (app, node) = node_router().await;

        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok\n");

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_varz_reports_snapshot_and_counts_itself() {
        let (app, node) = node_router().await;

        for expected in 1..=2u64 {
            let response = app
                .clone()
                .oneshot(Request::get("/varz").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["plan"], "free");
            assert_eq!(json["capacity"], 200);
            assert_eq!(json["counters"]["varz"], expected);
        }

        node.shutdown().await;
    }
}
