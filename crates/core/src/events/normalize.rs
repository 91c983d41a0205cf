//! Webhook payload normalization.
//!
//! Maps the delivery provider's raw event records onto [`EngagementEvent`].
//! Only renames and defaults fields: email format and timestamp range are not
//! validated, malformed values surface later as reconciliation no-ops.

use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

use super::{EngagementEvent, EventType};
use crate::errors::{Error, Result};

/// One record of the provider's webhook body, as sent on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEngagementEvent {
    pub email: Option<String>,
    pub event: Option<String>,
    /// Epoch seconds; providers send integers, some relays send floats or strings.
    pub timestamp: Option<Value>,
    pub url: Option<String>,
    pub reason: Option<String>,
    pub sg_message_id: Option<String>,
    pub sg_event_id: Option<String>,
}

impl From<RawEngagementEvent> for EngagementEvent {
    fn from(raw: RawEngagementEvent) -> Self {
        EngagementEvent {
            email: raw
                .email
                .map(|e| e.trim().to_lowercase())
                .unwrap_or_default(),
            event_type: raw
                .event
                .as_deref()
                .map(EventType::from_provider)
                .unwrap_or(EventType::Other),
            occurred_at: raw
                .timestamp
                .as_ref()
                .and_then(parse_epoch_seconds)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            url: non_empty(raw.url),
            reason: non_empty(raw.reason),
            message_id: non_empty(raw.sg_message_id),
            event_id: non_empty(raw.sg_event_id),
        }
    }
}

/// Normalizes a whole webhook body.
///
/// Fails with [`Error::InvalidPayload`] when the body is not a JSON array.
/// Elements that are not objects are skipped.
pub fn normalize_payload(payload: &Value) -> Result<Vec<EngagementEvent>> {
    let records = payload.as_array().ok_or_else(|| {
        Error::InvalidPayload(format!(
            "expected an array of events, got {}",
            json_kind(payload)
        ))
    })?;

    let mut events = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        match normalize_record(record) {
            Some(event) => events.push(event),
            None => warn!(
                "Skipping webhook record {}: expected an object, got {}",
                index,
                json_kind(record)
            ),
        }
    }
    Ok(events)
}

/// Normalizes a single record. Returns `None` if the record is not an object.
pub fn normalize_record(record: &Value) -> Option<EngagementEvent> {
    if !record.is_object() {
        return None;
    }
    // Field type mismatches (e.g. a numeric email) degrade to defaults rather
    // than rejecting the record.
    let raw = serde_json::from_value::<RawEngagementEvent>(record.clone())
        .unwrap_or_else(|_| lenient_raw(record));
    Some(raw.into())
}

fn lenient_raw(record: &Value) -> RawEngagementEvent {
    let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
    RawEngagementEvent {
        email: text("email"),
        event: text("event"),
        timestamp: record.get("timestamp").cloned(),
        url: text("url"),
        reason: text("reason"),
        sg_message_id: text("sg_message_id"),
        sg_event_id: text("sg_event_id"),
    }
}

fn parse_epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))?
        }
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
