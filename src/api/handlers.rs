//! HTTP request handlers

use super::types::{AckResponse, ErrorResponse, StatusResponse, SuccessResponse};
use super::AppState;
use crate::models::Ruleset;
use crate::telephony::WebhookEnvelope;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        // Platform webhook; GET doubles as a liveness probe
        .route("/call", get(liveness).post(receive_webhook))
        .route("/ruleset", post(upload_ruleset))
        .with_state(state)
}

async fn liveness() -> Json<StatusResponse> {
    Json(StatusResponse::alive())
}

/// Acknowledge first, handle in the background.
///
/// Anything but 200 makes the platform redeliver, so even unreadable bodies
/// are acknowledged.
async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match serde_json::from_slice::<WebhookEnvelope>(&body) {
        Ok(envelope) => state.events.submit(envelope.data),
        Err(e) => tracing::warn!(error = %e, bytes = body.len(), "Unreadable webhook body"),
    }
    (StatusCode::OK, Json(AckResponse { received: true }))
}

async fn upload_ruleset(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, AppError> {
    let ruleset: Ruleset = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid ruleset: {e}")))?;
    ruleset.validate().map_err(AppError::BadRequest)?;

    state
        .store
        .add_ruleset(&ruleset)
        .await
        .map_err(AppError::Internal)?;

    tracing::info!(ruleset_id = %ruleset.id, steps = ruleset.steps.len(), "Ruleset stored");
    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Ruleset {} stored", ruleset.id),
    }))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
