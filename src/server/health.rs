//! Health endpoint: the load balancer's view of this instance.

use super::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Decision store reachable
    pub store: bool,
    /// Event log reachable
    pub producer: bool,
}

/// Health check endpoint.
///
/// 200 only when both the decision store and the event log answer; a
/// handler that cannot reach either can only emit 503s, so the balancer
/// should stop routing here.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = state.store.ping().await.is_ok();
    let producer_ok = state.producer.ping().await.is_ok();

    let healthy = store_ok && producer_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            store: store_ok,
            producer: producer_ok,
        }),
    )
}
