//! HTTP server for Monday webhooks.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::ProcessError;
use crate::models::ItemId;
use crate::processor::{EventOutcome, Processor};
use crate::webhooks::{verify_webhook_signature, WebhookHeaders, WebhookPayload};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Event processor.
    pub processor: Arc<Processor>,
    /// Webhook signing secret. Verification is skipped when unset.
    pub signing_secret: Option<String>,
}

/// Build the HTTP router for the relay service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Webhook endpoint
        .route("/webhooks/monday", post(monday_webhook_handler))
        // Manual trigger for re-running a subitem
        .route("/trigger/resync", post(trigger_resync))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Unexpected faults become a generic internal error, never retried here.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "error": "internal error" })),
    )
        .into_response()
}

/// Map an outcome to its HTTP status.
fn status_for(outcome: &EventOutcome) -> StatusCode {
    match outcome {
        EventOutcome::Challenge(_) | EventOutcome::Skipped { .. } | EventOutcome::Success { .. } => {
            StatusCode::OK
        }
        EventOutcome::Failure { error, .. } => match error {
            ProcessError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            ProcessError::ClientNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ProcessError::SubitemLookup { .. } => StatusCode::BAD_GATEWAY,
            ProcessError::MissingParent { .. } | ProcessError::UnexpectedParentBoard { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        },
    }
}

fn outcome_response(outcome: &EventOutcome) -> (StatusCode, Json<Value>) {
    (status_for(outcome), Json(outcome.to_json()))
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.processor.is_ready() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({ "status": "ready" })))
}

/// Handle incoming Monday webhooks.
///
/// This handler:
/// 1. Verifies the JWT in `Authorization` (if a secret is configured)
/// 2. Parses the payload
/// 3. Hands it to the processor and renders the outcome
pub async fn monday_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let webhook_headers = WebhookHeaders::from_header_map(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    });

    if let Some(secret) = &state.signing_secret {
        let Some(token) = &webhook_headers.authorization else {
            warn!("Missing Authorization header");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "status": "error", "error": "missing signature" })),
            );
        };

        if !verify_webhook_signature(token, secret) {
            warn!("Invalid webhook signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "status": "error", "error": "invalid signature" })),
            );
        }
        debug!("Webhook signature verified");
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to parse webhook payload: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "error": format!("invalid payload: {e}") })),
            );
        }
    };

    let outcome = state.processor.process_event(&payload).await;
    info!(
        correlation_id = ?outcome.correlation_id(),
        message = %outcome.message(),
        "Webhook processed"
    );
    outcome_response(&outcome)
}

/// Request body for a manual resync.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResyncRequest {
    subitem_id: ItemId,
}

/// Re-run propagation for one subitem using its current relation value.
async fn trigger_resync(
    State(state): State<AppState>,
    Json(request): Json<ResyncRequest>,
) -> (StatusCode, Json<Value>) {
    info!(subitem_id = %request.subitem_id, "Manual resync requested");
    let outcome = state.processor.resync_subitem(request.subitem_id).await;
    outcome_response(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use uuid::Uuid;

    fn failure(error: ProcessError) -> EventOutcome {
        EventOutcome::Failure {
            correlation_id: Uuid::new_v4(),
            error,
        }
    }

    #[test]
    fn test_status_for_failures() {
        assert_eq!(
            status_for(&failure(ProcessError::MissingParent {
                subitem_id: ItemId(1)
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&failure(ProcessError::SubitemLookup {
                subitem_id: ItemId(1),
                source: ApiError::MissingData,
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&failure(ProcessError::MalformedEvent("x".to_string()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&EventOutcome::Challenge(serde_json::json!("abc"))),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "status": "error", "error": "internal error" }));
    }
}
