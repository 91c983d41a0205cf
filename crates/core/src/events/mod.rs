//! Engagement events module.
//!
//! Provides the canonical event type, webhook payload normalization and the
//! sink trait the ingress endpoint emits through.

mod engagement_event;
mod normalize;
mod sink;

pub use engagement_event::*;
pub use normalize::{normalize_payload, normalize_record, RawEngagementEvent};
pub use sink::*;
