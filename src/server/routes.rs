//! Router configuration.

use super::health::health_check;
use super::state::AppState;
use crate::api::{admin, issue, status};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Rate limiting is not done here: the edge balancer sheds excess load
/// before requests reach these handlers.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/coupons/issue", post(issue::issue_coupon))
        .route("/coupons/status/:event_id", get(status::event_status))
        .route(
            "/coupons/user/:user_id/event/:event_id",
            get(status::user_coupon),
        )
        .route("/admin/events", post(admin::create_event))
        .route("/admin/events/:event_id/stock", post(admin::initialize_stock))
        .route(
            "/admin/events/:event_id/deactivate",
            post(admin::deactivate_event),
        );

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
