//! Canonical engagement event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of engagement reported by the delivery provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Open,
    Click,
    Bounce,
    Dropped,
    /// Delivered, processed, deferred, spam reports and anything else we
    /// don't aggregate.
    Other,
}

impl EventType {
    /// Maps a provider event name onto an event type. Unknown names map to
    /// `Other`.
    pub fn from_provider(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "open" => EventType::Open,
            "click" => EventType::Click,
            "bounce" => EventType::Bounce,
            "dropped" => EventType::Dropped,
            _ => EventType::Other,
        }
    }

    /// Bounces and drops are folded identically.
    pub fn is_failure(self) -> bool {
        matches!(self, EventType::Bounce | EventType::Dropped)
    }
}

/// Normalized representation of one engagement notification.
///
/// Immutable once built; ordering within a batch is insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementEvent {
    pub email: String,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub url: Option<String>,
    pub reason: Option<String>,
    pub message_id: Option<String>,
    pub event_id: Option<String>,
}

impl EngagementEvent {
    /// Creates an event with no optional fields set.
    pub fn new(email: impl Into<String>, event_type: EventType, occurred_at: DateTime<Utc>) -> Self {
        Self {
            email: email.into(),
            event_type,
            occurred_at,
            url: None,
            reason: None,
            message_id: None,
            event_id: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_from_provider() {
        assert_eq!(EventType::from_provider("open"), EventType::Open);
        assert_eq!(EventType::from_provider("CLICK"), EventType::Click);
        assert_eq!(EventType::from_provider(" bounce "), EventType::Bounce);
        assert_eq!(EventType::from_provider("dropped"), EventType::Dropped);
        assert_eq!(EventType::from_provider("delivered"), EventType::Other);
        assert_eq!(EventType::from_provider(""), EventType::Other);
    }

    #[test]
    fn test_failure_types() {
        assert!(EventType::Bounce.is_failure());
        assert!(EventType::Dropped.is_failure());
        assert!(!EventType::Open.is_failure());
        assert!(!EventType::Other.is_failure());
    }
}
