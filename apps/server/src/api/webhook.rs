use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use mailpulse_core::events::normalize_payload;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct WebhookAccepted {
    pub accepted: usize,
}

/// Accepts a provider's event array and hands the normalized events to the
/// sink. Reconciliation happens later, off the request path.
///
/// The body is read as raw bytes so a missing or wrong content type does not
/// turn a valid payload away.
async fn receive_events(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    body: Bytes,
) -> ApiResult<Json<WebhookAccepted>> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Body is not valid JSON: {}", e)))?;
    let events = normalize_payload(&payload)?;

    let accepted = events.len();
    tracing::debug!("Accepted {} events from {}", accepted, provider);
    state.engagement_sink.emit_batch(events);

    Ok(Json(WebhookAccepted { accepted }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/{provider}", post(receive_events))
}
