//! Read-only status probes.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::broker::Provisioner;

/// Create the probe router.
pub fn router(provisioner: Provisioner) -> Router {
    Router::new()
        .route("/varz", get(varz))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(provisioner)
}

async fn varz(State(provisioner): State<Provisioner>) -> impl IntoResponse {
    Json(provisioner.varz().await)
}

async fn healthz() -> &'static str {
    "ok\n"
}
