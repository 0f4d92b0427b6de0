//! Status and lookup endpoints.
//!
//! Live counters come from the decision store; the persisted total comes
//! from the database and may lag behind by the writer's backlog.

use crate::server::{AppError, AppState};
use crate::types::{EventId, UserId};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// Event status response.
#[derive(Debug, Serialize)]
pub struct EventStatusResponse {
    /// Campaign identifier
    pub event_id: String,
    /// Live stock counter (0 when uninitialized or drained)
    pub remaining_stock: i64,
    /// Live participant count
    pub total_participants: u64,
    /// Rows persisted so far; trails the live counters by consumer lag
    pub total_issued: i64,
}

/// `GET /api/v1/coupons/status/:event_id`
pub async fn event_status(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<EventStatusResponse>, AppError> {
    let event = EventId::new(event_id);

    let remaining = state
        .store
        .remaining(event.clone())
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?
        .unwrap_or(0);

    let participants = state
        .store
        .participants_count(event.clone())
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?;

    let issued = state
        .db
        .count_issued(&event)
        .await
        .map_err(|e| AppError::internal("failed to count issuances").with_source(e.into()))?;

    Ok(Json(EventStatusResponse {
        event_id: event.0,
        remaining_stock: remaining.max(0),
        total_participants: participants,
        total_issued: issued,
    }))
}

/// User coupon lookup response.
#[derive(Debug, Serialize)]
pub struct UserCouponResponse {
    /// Requesting user
    pub user_id: String,
    /// Target campaign
    pub event_id: String,
    /// Cached coupon, absent when the user holds none (or the cache slot
    /// expired)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,
}

/// `GET /api/v1/coupons/user/:user_id/event/:event_id`
pub async fn user_coupon(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(String, String)>,
) -> Result<Json<UserCouponResponse>, AppError> {
    let user = UserId::new(user_id);
    let event = EventId::new(event_id);

    let coupon = state
        .store
        .get_user_coupon(event.clone(), user.clone())
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?;

    Ok(Json(UserCouponResponse {
        user_id: user.0,
        event_id: event.0,
        coupon_id: coupon.map(|c| c.as_uuid()),
    }))
}
