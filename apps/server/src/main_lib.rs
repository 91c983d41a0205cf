use std::sync::Arc;

use crate::config::Config;
use mailpulse_core::batch::BatchAccumulator;
use mailpulse_core::events::EngagementSink;
use mailpulse_core::reconcile::Reconciler;
use mailpulse_crm::CrmClient;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub struct AppState {
    /// Where accepted webhook events go. The batch accumulator in production.
    pub engagement_sink: Arc<dyn EngagementSink>,
}

impl AppState {
    pub fn new(engagement_sink: Arc<dyn EngagementSink>) -> Arc<Self> {
        Arc::new(Self { engagement_sink })
    }
}

pub fn init_tracing() {
    let log_format = std::env::var("MP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// Wires CRM client -> reconciler -> batch accumulator.
///
/// Must be called from within the Tokio runtime; the accumulator spawns its
/// flush tasks there.
pub fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let crm = CrmClient::new(config.crm.clone(), config.crm_timeout)?
        .with_field_map(config.crm_fields.clone());
    tracing::info!(
        "CRM login endpoint {} (API v{}), message object {}",
        config.crm.login_url,
        config.crm.api_version,
        config.crm_fields.message.object
    );
    let crm = Arc::new(crm);

    let reconciler = Arc::new(Reconciler::new(crm, config.precedence));
    tracing::info!("Precedence policy: {}", config.precedence);

    let accumulator = BatchAccumulator::new(config.batch, reconciler);
    tracing::info!(
        "Batching up to {} events or {} ms",
        config.batch.size_threshold,
        config.batch.timeout.as_millis()
    );

    Ok(AppState::new(Arc::new(accumulator)))
}
