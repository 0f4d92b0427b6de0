//! Event lifecycle administration.
//!
//! Initialization is an explicit action here, never implicit on first
//! issuance: concurrent first-requests racing to auto-seed is exactly the
//! bug this split prevents.

use crate::db::NewEvent;
use crate::server::{AppError, AppState};
use crate::types::EventId;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Request to create a campaign's metadata row.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// Campaign identifier
    pub event_id: String,
    /// Human name
    pub event_name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Campaign window start
    pub start_time: DateTime<Utc>,
    /// Campaign window end
    pub end_time: DateTime<Utc>,
}

/// Response after creating a campaign.
#[derive(Debug, Serialize)]
pub struct CreateEventResponse {
    /// Campaign identifier
    pub event_id: String,
    /// `false` when the row already existed
    pub created: bool,
}

/// `POST /api/v1/admin/events`
pub async fn create_event(
    State(state): State<AppState>,
    Json(request): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<CreateEventResponse>), AppError> {
    if request.event_id.trim().is_empty() {
        return Err(AppError::bad_request("event_id must not be empty"));
    }
    if request.end_time <= request.start_time {
        return Err(AppError::bad_request("end_time must be after start_time"));
    }

    let event = NewEvent {
        event_id: EventId::new(request.event_id.trim()),
        event_name: request.event_name,
        description: request.description,
        start_time: request.start_time,
        end_time: request.end_time,
    };

    let created = state
        .db
        .create_event(&event)
        .await
        .map_err(|e| AppError::internal("failed to create event").with_source(e.into()))?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(CreateEventResponse {
            event_id: event.event_id.0,
            created,
        }),
    ))
}

/// Query parameters for stock initialization.
#[derive(Debug, Deserialize)]
pub struct InitStockQuery {
    /// Total stock to seed
    pub initial_stock: i64,
}

/// Response after seeding stock.
#[derive(Debug, Serialize)]
pub struct InitStockResponse {
    /// Campaign identifier
    pub event_id: String,
    /// The requested total
    pub initial_stock: i64,
    /// `false` when the counter already existed and was left untouched
    pub seeded: bool,
}

/// `POST /api/v1/admin/events/:event_id/stock?initial_stock=N`
///
/// One logical action over two stores: the metadata row records the total
/// and the decision store gets its counter via `SET NX`. Both halves are
/// safe to re-run, so a partial failure is repaired by calling again.
pub async fn initialize_stock(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<InitStockQuery>,
) -> Result<Json<InitStockResponse>, AppError> {
    if query.initial_stock < 0 {
        return Err(AppError::bad_request("initial_stock must be non-negative"));
    }
    let event = EventId::new(event_id);

    let default_end = Utc::now()
        + ChronoDuration::from_std(state.participant_ttl)
            .map_err(|e| AppError::internal(e.to_string()))?;

    let end_time = state
        .db
        .upsert_stock(&event, query.initial_stock, default_end)
        .await
        .map_err(|e| AppError::internal("failed to record stock").with_source(e.into()))?;

    // The participant set and counter must outlive the event's end plus
    // the worst-case writer lag, or reconciliation reports false gaps.
    let horizon = (end_time - Utc::now())
        .to_std()
        .unwrap_or_default()
        .max(state.participant_ttl)
        + state.ttl_grace;

    #[allow(clippy::cast_sign_loss)]
    let seeded = state
        .store
        .init_event(event.clone(), query.initial_stock as u64, horizon)
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?;

    Ok(Json(InitStockResponse {
        event_id: event.0,
        initial_stock: query.initial_stock,
        seeded,
    }))
}

/// Response after deactivating a campaign.
#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    /// Campaign identifier
    pub event_id: String,
    /// Always `false` after this call
    pub is_active: bool,
}

/// `POST /api/v1/admin/events/:event_id/deactivate`
pub async fn deactivate_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<DeactivateResponse>, AppError> {
    let event = EventId::new(event_id);

    let found = state
        .db
        .deactivate(&event)
        .await
        .map_err(|e| AppError::internal("failed to deactivate").with_source(e.into()))?;

    if !found {
        return Err(AppError::not_found("event", &event));
    }

    Ok(Json(DeactivateResponse {
        event_id: event.0,
        is_active: false,
    }))
}
