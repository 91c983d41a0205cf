use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;
use mailpulse_core::batch::BatchConfig;
use mailpulse_core::constants::{DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT_MS};
use mailpulse_core::reconcile::PrecedencePolicy;
use mailpulse_crm::{
    CrmCredentials, FieldMap, DEFAULT_API_VERSION, DEFAULT_LOGIN_URL, DEFAULT_TIMEOUT_SECS,
};

/// Default time allowed for one inbound request.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

pub struct Config {
    pub listen_addr: SocketAddr,
    pub crm: CrmCredentials,
    /// Remote object and field names.
    pub crm_fields: FieldMap,
    /// Timeout for each outbound CRM call.
    pub crm_timeout: Duration,
    pub batch: BatchConfig,
    pub precedence: PrecedencePolicy,
    /// Timeout for inbound HTTP requests.
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut listen_addr: SocketAddr = env_or("MP_LISTEN_ADDR", "0.0.0.0:3000")
            .parse()
            .context("Invalid MP_LISTEN_ADDR")?;
        // Hosting platforms hand out the port separately.
        if let Ok(port) = std::env::var("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => listen_addr.set_port(port),
                Err(_) => tracing::warn!("Ignoring invalid PORT value {:?}", port),
            }
        }

        let crm = CrmCredentials {
            login_url: env_or("MP_CRM_LOGIN_URL", DEFAULT_LOGIN_URL),
            username: env_or("MP_CRM_USERNAME", ""),
            password: env_or("MP_CRM_PASSWORD", ""),
            security_token: env_or("MP_CRM_SECURITY_TOKEN", ""),
            api_version: env_or("MP_CRM_API_VERSION", DEFAULT_API_VERSION),
        };
        if crm.username.is_empty() {
            tracing::warn!("MP_CRM_USERNAME is not set; CRM logins will fail");
        }

        let batch_size: usize = parse_or("MP_BATCH_SIZE", DEFAULT_BATCH_SIZE);
        let batch_timeout_ms: u64 = parse_or("MP_BATCH_TIMEOUT_MS", DEFAULT_BATCH_TIMEOUT_MS);
        let precedence: PrecedencePolicy = parse_or("MP_PRECEDENCE_POLICY", PrecedencePolicy::default());
        let request_timeout_ms: u64 = parse_or("MP_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS);
        let crm_timeout_ms: u64 = parse_or("MP_CRM_TIMEOUT_MS", DEFAULT_TIMEOUT_SECS * 1000);

        Ok(Self {
            listen_addr,
            crm,
            crm_fields: field_map_from(|key| std::env::var(key).ok()),
            crm_timeout: Duration::from_millis(crm_timeout_ms),
            batch: BatchConfig::new(batch_size, Duration::from_millis(batch_timeout_ms)),
            precedence,
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }
}

/// Builds the CRM field map from `MP_CRM_*` overrides on top of the defaults.
fn field_map_from(lookup: impl Fn(&str) -> Option<String>) -> FieldMap {
    let mut fields = FieldMap::default();
    let message = &mut fields.message;
    let counters = &mut fields.counters;
    let overrides: [(&str, &mut String); 16] = [
        ("MP_CRM_MESSAGE_OBJECT", &mut message.object),
        ("MP_CRM_MESSAGE_ID_FIELD", &mut message.message_id),
        ("MP_CRM_MESSAGE_OPEN_COUNT_FIELD", &mut message.open_count),
        ("MP_CRM_MESSAGE_CLICK_COUNT_FIELD", &mut message.click_count),
        ("MP_CRM_MESSAGE_FIRST_OPENED_FIELD", &mut message.first_opened_at),
        ("MP_CRM_MESSAGE_LAST_CLICKED_FIELD", &mut message.last_clicked_at),
        ("MP_CRM_MESSAGE_CLICKED_URLS_FIELD", &mut message.clicked_urls),
        ("MP_CRM_MESSAGE_BOUNCED_AT_FIELD", &mut message.bounced_at),
        ("MP_CRM_MESSAGE_BOUNCE_REASON_FIELD", &mut message.bounce_reason),
        ("MP_CRM_OPEN_COUNT_FIELD", &mut counters.open_count),
        ("MP_CRM_CLICK_COUNT_FIELD", &mut counters.click_count),
        ("MP_CRM_LAST_OPENED_FIELD", &mut counters.last_opened_at),
        ("MP_CRM_LAST_CLICKED_FIELD", &mut counters.last_clicked_at),
        ("MP_CRM_LAST_CLICKED_URL_FIELD", &mut counters.last_clicked_url),
        ("MP_CRM_LAST_BOUNCED_FIELD", &mut counters.last_bounced_at),
        ("MP_CRM_LAST_BOUNCE_REASON_FIELD", &mut counters.last_bounce_reason),
    ];
    for (key, name) in overrides {
        let Some(raw) = lookup(key) else { continue };
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        // Names go into queries unquoted.
        if is_api_name(value) {
            *name = value.to_string();
        } else {
            tracing::warn!("Invalid {} value {:?}; using {}", key, raw, name);
        }
    }
    fields
}

fn is_api_name(value: &str) -> bool {
    value.starts_with(|c: char| c.is_ascii_alphabetic())
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses an optional variable, falling back to `default` with a warning when
/// the value is unusable.
fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value {:?}; using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
