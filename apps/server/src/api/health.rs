use std::sync::Arc;

use crate::main_lib::AppState;
use axum::{routing::get, Router};

/// Liveness probe. Independent of batch and CRM state.
async fn health() -> &'static str {
    "OK"
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
