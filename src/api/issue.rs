//! The issuance endpoint.

use crate::issuance::IssueOutcome;
use crate::server::{AppError, AppState};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to issue a coupon.
#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    /// Requesting user
    pub user_id: String,
    /// Target campaign
    pub event_id: String,
}

/// Issuance response. A business rejection is still a 200: the HTTP call
/// succeeded, the decision said no.
#[derive(Debug, Serialize)]
pub struct IssueResponse {
    /// Whether a coupon was granted
    pub success: bool,
    /// The granted coupon, durable in the log by the time this is sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,
    /// Stock left after this grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    /// Rejection code for `success == false`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// `POST /api/v1/coupons/issue`
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/v1/coupons/issue \
///   -H "Content-Type: application/json" \
///   -d '{"user_id": "u1", "event_id": "spring-drop"}'
/// ```
pub async fn issue_coupon(
    State(state): State<AppState>,
    Json(request): Json<IssueRequest>,
) -> Result<Json<IssueResponse>, AppError> {
    let outcome = state
        .service
        .issue(&request.user_id, &request.event_id)
        .await?;

    let response = match outcome {
        IssueOutcome::Issued(coupon) => IssueResponse {
            success: true,
            coupon_id: Some(coupon.coupon_id.as_uuid()),
            remaining: Some(coupon.remaining),
            reason: None,
        },
        IssueOutcome::Rejected { reason } => IssueResponse {
            success: false,
            coupon_id: None,
            remaining: None,
            reason: Some(reason),
        },
    };

    Ok(Json(response))
}
