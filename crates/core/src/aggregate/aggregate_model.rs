//! Batch-scoped engagement aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Returns true if `candidate` is strictly newer than `current`.
///
/// Equal timestamps keep the value already held.
pub fn supersedes(candidate: DateTime<Utc>, current: Option<DateTime<Utc>>) -> bool {
    current.map_or(true, |current| candidate > current)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRecord {
    pub occurred_at: DateTime<Utc>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BounceRecord {
    pub occurred_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Engagement for one message id within a batch.
///
/// Bounces and drops keep only the most recent occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEngagement {
    pub opens: Vec<DateTime<Utc>>,
    pub clicks: Vec<ClickRecord>,
    pub bounce: Option<BounceRecord>,
}

impl MessageEngagement {
    pub fn open_count(&self) -> u64 {
        self.opens.len() as u64
    }

    pub fn click_count(&self) -> u64 {
        self.clicks.len() as u64
    }

    /// Earliest open in the batch.
    pub fn first_open(&self) -> Option<DateTime<Utc>> {
        self.opens.iter().min().copied()
    }

    /// Most recent click; the first-seen click wins a timestamp tie.
    pub fn last_click(&self) -> Option<&ClickRecord> {
        self.clicks.iter().fold(None, |latest: Option<&ClickRecord>, click| {
            if supersedes(click.occurred_at, latest.map(|l| l.occurred_at)) {
                Some(click)
            } else {
                latest
            }
        })
    }

    /// Distinct clicked URLs in first-seen order.
    pub fn clicked_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        for url in self.clicks.iter().filter_map(|c| c.url.as_deref()) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    pub(crate) fn record_bounce(&mut self, occurred_at: DateTime<Utc>, reason: Option<String>) {
        if supersedes(occurred_at, self.bounce.as_ref().map(|b| b.occurred_at)) {
            self.bounce = Some(BounceRecord {
                occurred_at,
                reason,
            });
        }
    }
}

/// Aggregate engagement for one email address within a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEngagement {
    pub total_opens: u64,
    pub total_clicks: u64,
    pub last_open_at: Option<DateTime<Utc>>,
    pub last_click_at: Option<DateTime<Utc>>,
    pub last_click_url: Option<String>,
    pub last_bounce_at: Option<DateTime<Utc>>,
    pub last_bounce_reason: Option<String>,
}

impl EmailEngagement {
    pub fn record_open(&mut self, occurred_at: DateTime<Utc>) {
        self.total_opens += 1;
        if supersedes(occurred_at, self.last_open_at) {
            self.last_open_at = Some(occurred_at);
        }
    }

    pub fn record_click(&mut self, occurred_at: DateTime<Utc>, url: Option<String>) {
        self.total_clicks += 1;
        if supersedes(occurred_at, self.last_click_at) {
            self.last_click_at = Some(occurred_at);
            self.last_click_url = url;
        }
    }

    pub fn record_bounce(&mut self, occurred_at: DateTime<Utc>, reason: Option<String>) {
        if supersedes(occurred_at, self.last_bounce_at) {
            self.last_bounce_at = Some(occurred_at);
            self.last_bounce_reason = reason;
        }
    }

    /// Folds another aggregate into this one (used for account rollups).
    pub fn merge(&mut self, other: &EmailEngagement) {
        self.total_opens += other.total_opens;
        self.total_clicks += other.total_clicks;
        if let Some(at) = other.last_open_at {
            if supersedes(at, self.last_open_at) {
                self.last_open_at = Some(at);
            }
        }
        if let Some(at) = other.last_click_at {
            if supersedes(at, self.last_click_at) {
                self.last_click_at = Some(at);
                self.last_click_url = other.last_click_url.clone();
            }
        }
        if let Some(at) = other.last_bounce_at {
            if supersedes(at, self.last_bounce_at) {
                self.last_bounce_at = Some(at);
                self.last_bounce_reason = other.last_bounce_reason.clone();
            }
        }
    }
}

/// Both views derived from one flushed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchAggregates {
    pub by_message: BTreeMap<String, MessageEngagement>,
    pub by_email: BTreeMap<String, EmailEngagement>,
}

impl BatchAggregates {
    pub fn is_empty(&self) -> bool {
        self.by_message.is_empty() && self.by_email.is_empty()
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.by_message.keys().cloned().collect()
    }

    pub fn emails(&self) -> Vec<String> {
        self.by_email.keys().cloned().collect()
    }
}
