//! Remote record views and reconciliation results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{supersedes, EmailEngagement};
use crate::errors::Error;

/// Stored timestamp fields on message and person records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampField {
    FirstOpened,
    LastOpened,
    LastClicked,
    Bounced,
}

/// Message-level CRM record (one per sent email).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Remote record id.
    pub id: String,
    /// Provider message id the record is keyed by.
    pub message_id: String,
    pub open_count: u64,
    pub click_count: u64,
    pub first_opened_at: Option<DateTime<Utc>>,
    pub last_clicked_at: Option<DateTime<Utc>>,
    /// `;`-separated list of distinct clicked URLs.
    pub clicked_urls: Option<String>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub bounce_reason: Option<String>,
    /// Timestamps stored remotely in a form that could not be read. Merges
    /// leave them alone and updates do not write them back.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unreadable: BTreeSet<TimestampField>,
}

/// Person-level CRM record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PersonKind {
    Lead,
    Contact,
    Account,
}

impl PersonKind {
    /// Remote object name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonKind::Lead => "Lead",
            PersonKind::Contact => "Contact",
            PersonKind::Account => "Account",
        }
    }
}

impl fmt::Display for PersonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engagement counters stored on lead, contact and account records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementCounters {
    pub open_count: u64,
    pub click_count: u64,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_clicked_at: Option<DateTime<Utc>>,
    pub last_clicked_url: Option<String>,
    pub last_bounced_at: Option<DateTime<Utc>>,
    pub last_bounce_reason: Option<String>,
    /// See [`MessageRecord::unreadable`].
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unreadable: BTreeSet<TimestampField>,
}

impl EngagementCounters {
    /// Adds a batch aggregate onto the stored counters.
    ///
    /// Counts only grow. Timestamps (and the url/reason that ride with them)
    /// move only when the batch value is strictly newer than a readable stored
    /// value. Returns true if anything changed.
    pub fn absorb(&mut self, engagement: &EmailEngagement) -> bool {
        let mut changed = false;

        if engagement.total_opens > 0 {
            self.open_count = self.open_count.saturating_add(engagement.total_opens);
            changed = true;
        }
        if engagement.total_clicks > 0 {
            self.click_count = self.click_count.saturating_add(engagement.total_clicks);
            changed = true;
        }
        if let Some(at) = engagement.last_open_at {
            if self.moves_forward(TimestampField::LastOpened, at, self.last_opened_at) {
                self.last_opened_at = Some(at);
                changed = true;
            }
        }
        if let Some(at) = engagement.last_click_at {
            if self.moves_forward(TimestampField::LastClicked, at, self.last_clicked_at) {
                self.last_clicked_at = Some(at);
                self.last_clicked_url = engagement.last_click_url.clone();
                changed = true;
            }
        }
        if let Some(at) = engagement.last_bounce_at {
            if self.moves_forward(TimestampField::Bounced, at, self.last_bounced_at) {
                self.last_bounced_at = Some(at);
                self.last_bounce_reason = engagement.last_bounce_reason.clone();
                changed = true;
            }
        }

        changed
    }

    fn moves_forward(
        &self,
        field: TimestampField,
        candidate: DateTime<Utc>,
        stored: Option<DateTime<Utc>>,
    ) -> bool {
        !self.unreadable.contains(&field) && supersedes(candidate, stored)
    }
}

/// Lead, contact or account record as seen by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    pub id: String,
    pub kind: PersonKind,
    /// Set for leads and contacts.
    pub email: Option<String>,
    /// Set for accounts.
    pub website: Option<String>,
    /// Parent account of a contact.
    pub account_id: Option<String>,
    pub counters: EngagementCounters,
}

impl PersonRecord {
    pub fn new(id: impl Into<String>, kind: PersonKind) -> Self {
        Self {
            id: id.into(),
            kind,
            email: None,
            website: None,
            account_id: None,
            counters: EngagementCounters::default(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_counters(mut self, counters: EngagementCounters) -> Self {
        self.counters = counters;
        self
    }
}

/// Outcome of one record within a bulk update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResult {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RecordResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            errors: vec![error.into()],
        }
    }
}

/// Tally of one bulk update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<RecordResult>,
}

impl UpdateReport {
    pub fn from_results(attempted: usize, results: Vec<RecordResult>) -> Self {
        let (ok, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.success);
        Self {
            attempted,
            succeeded: ok.len(),
            failures,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Which person-level record type receives an email's engagement.
///
/// Chosen once per deployment; the policies are not compatible with each
/// other and are never combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedencePolicy {
    /// Update leads only.
    LeadOnly,
    /// Account by website domain, else contact by email, else lead by email.
    #[default]
    AccountContactLead,
    /// Update leads, and roll contact engagement up onto the parent account.
    LeadWithAccountRollup,
}

impl PrecedencePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecedencePolicy::LeadOnly => "lead_only",
            PrecedencePolicy::AccountContactLead => "account_contact_lead",
            PrecedencePolicy::LeadWithAccountRollup => "lead_with_account_rollup",
        }
    }
}

impl fmt::Display for PrecedencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrecedencePolicy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lead_only" => Ok(PrecedencePolicy::LeadOnly),
            "account_contact_lead" => Ok(PrecedencePolicy::AccountContactLead),
            "lead_with_account_rollup" => Ok(PrecedencePolicy::LeadWithAccountRollup),
            other => Err(Error::InvalidConfigValue(format!(
                "Unknown precedence policy: {}",
                other
            ))),
        }
    }
}

/// What one batch's reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub events: usize,
    pub message_updates: UpdateReport,
    pub person_updates: BTreeMap<PersonKind, UpdateReport>,
    /// Message ids with no remote message record.
    pub unmatched_messages: Vec<String>,
    /// Emails that resolved to no person-level target.
    pub unmatched_emails: Vec<String>,
    /// Flow-level failures (queries or bulk calls that failed outright).
    pub errors: Vec<String>,
}
