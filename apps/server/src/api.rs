use std::sync::Arc;

use crate::{config::Config, main_lib::AppState};
use axum::Router;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

mod health;
mod webhook;

pub use webhook::WebhookAccepted;

pub fn app_router(state: Arc<AppState>, config: &Config) -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhook::router())
        .with_state(state)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
}
