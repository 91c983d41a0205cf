//! Resolves emails to the single person-level record that receives their
//! engagement, according to the deployment's [`PrecedencePolicy`].

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use url::Url;

use super::crm_traits::CrmStore;
use super::reconcile_model::{PersonKind, PersonRecord, PrecedencePolicy};
use crate::aggregate::EmailEngagement;
use crate::errors::Result;

/// Records chosen for update, each with the merged engagement of every email
/// routed to it.
#[derive(Debug, Default)]
pub struct ResolvedTargets {
    targets: BTreeMap<(PersonKind, String), (PersonRecord, EmailEngagement)>,
    pub unmatched: Vec<String>,
}

impl ResolvedTargets {
    fn add(&mut self, record: &PersonRecord, engagement: &EmailEngagement) {
        self.targets
            .entry((record.kind, record.id.clone()))
            .or_insert_with(|| (record.clone(), EmailEngagement::default()))
            .1
            .merge(engagement);
    }

    /// Targets grouped by record type, in id order.
    pub fn by_kind(self) -> BTreeMap<PersonKind, Vec<(PersonRecord, EmailEngagement)>> {
        let mut grouped: BTreeMap<PersonKind, Vec<_>> = BTreeMap::new();
        for ((kind, _), target) in self.targets {
            grouped.entry(kind).or_default().push(target);
        }
        grouped
    }
}

/// Lower-cased host of a website or domain string, without scheme, `www.`,
/// port or path.
pub fn normalize_domain(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let host = Url::parse(&candidate).ok()?.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Normalized domain part of an email address.
pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.trim().rsplit_once('@')?;
    normalize_domain(domain)
}

/// Resolves every email in `by_email` under `policy`.
///
/// Emails with no target end up in `unmatched`. When several remote records
/// match one email or domain, the first one returned wins.
pub async fn resolve_targets(
    store: &dyn CrmStore,
    policy: PrecedencePolicy,
    by_email: &BTreeMap<String, EmailEngagement>,
) -> Result<ResolvedTargets> {
    match policy {
        PrecedencePolicy::LeadOnly => resolve_lead_only(store, by_email).await,
        PrecedencePolicy::AccountContactLead => resolve_account_contact_lead(store, by_email).await,
        PrecedencePolicy::LeadWithAccountRollup => resolve_lead_with_rollup(store, by_email).await,
    }
}

async fn resolve_lead_only(
    store: &dyn CrmStore,
    by_email: &BTreeMap<String, EmailEngagement>,
) -> Result<ResolvedTargets> {
    let mut resolved = ResolvedTargets::default();
    let emails: Vec<String> = by_email.keys().cloned().collect();
    let leads = index_by_email(
        PersonKind::Lead,
        store.find_people_by_email(PersonKind::Lead, &emails).await?,
    );

    for (email, engagement) in by_email {
        match leads.get(email) {
            Some(lead) => resolved.add(lead, engagement),
            None => resolved.unmatched.push(email.clone()),
        }
    }
    Ok(resolved)
}

async fn resolve_account_contact_lead(
    store: &dyn CrmStore,
    by_email: &BTreeMap<String, EmailEngagement>,
) -> Result<ResolvedTargets> {
    let mut resolved = ResolvedTargets::default();
    let mut remaining: Vec<&String> = Vec::new();

    // Accounts by website domain.
    let domains: BTreeSet<String> = by_email.keys().filter_map(|e| email_domain(e)).collect();
    let accounts = if domains.is_empty() {
        BTreeMap::new()
    } else {
        let domains: Vec<String> = domains.into_iter().collect();
        index_accounts_by_domain(store.find_accounts_by_domain(&domains).await?)
    };
    for (email, engagement) in by_email {
        match email_domain(email).and_then(|d| accounts.get(&d)) {
            Some(account) => {
                debug!("{} routed to Account {} by domain", email, account.id);
                resolved.add(account, engagement);
            }
            None => remaining.push(email),
        }
    }

    // Contacts by exact email.
    let mut leftover: Vec<&String> = Vec::new();
    if !remaining.is_empty() {
        let emails: Vec<String> = remaining.iter().map(|e| (*e).clone()).collect();
        let contacts = index_by_email(
            PersonKind::Contact,
            store
                .find_people_by_email(PersonKind::Contact, &emails)
                .await?,
        );
        for email in remaining {
            match contacts.get(email) {
                Some(contact) => resolved.add(contact, &by_email[email]),
                None => leftover.push(email),
            }
        }
    }

    // Leads for whatever is left.
    if !leftover.is_empty() {
        let emails: Vec<String> = leftover.iter().map(|e| (*e).clone()).collect();
        let leads = index_by_email(
            PersonKind::Lead,
            store.find_people_by_email(PersonKind::Lead, &emails).await?,
        );
        for email in leftover {
            match leads.get(email) {
                Some(lead) => resolved.add(lead, &by_email[email]),
                None => resolved.unmatched.push(email.clone()),
            }
        }
    }

    Ok(resolved)
}

async fn resolve_lead_with_rollup(
    store: &dyn CrmStore,
    by_email: &BTreeMap<String, EmailEngagement>,
) -> Result<ResolvedTargets> {
    let mut resolved = ResolvedTargets::default();
    let emails: Vec<String> = by_email.keys().cloned().collect();

    let leads = index_by_email(
        PersonKind::Lead,
        store.find_people_by_email(PersonKind::Lead, &emails).await?,
    );
    let contacts = index_by_email(
        PersonKind::Contact,
        store
            .find_people_by_email(PersonKind::Contact, &emails)
            .await?,
    );

    let account_ids: BTreeSet<String> = contacts
        .values()
        .filter_map(|c| c.account_id.clone())
        .collect();
    let accounts: BTreeMap<String, PersonRecord> = if account_ids.is_empty() {
        BTreeMap::new()
    } else {
        let ids: Vec<String> = account_ids.into_iter().collect();
        store
            .find_accounts_by_id(&ids)
            .await?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect()
    };

    for (email, engagement) in by_email {
        let mut matched = false;
        if let Some(lead) = leads.get(email) {
            resolved.add(lead, engagement);
            matched = true;
        }
        let parent = contacts
            .get(email)
            .and_then(|c| c.account_id.as_ref())
            .and_then(|id| accounts.get(id));
        match parent {
            Some(account) => {
                resolved.add(account, engagement);
                matched = true;
            }
            None if contacts.contains_key(email) => {
                debug!("Contact for {} has no resolvable parent account", email);
            }
            None => {}
        }
        if !matched {
            resolved.unmatched.push(email.clone());
        }
    }

    Ok(resolved)
}

fn index_by_email(kind: PersonKind, records: Vec<PersonRecord>) -> BTreeMap<String, PersonRecord> {
    let mut index: BTreeMap<String, PersonRecord> = BTreeMap::new();
    for record in records {
        let Some(email) = record.email.as_deref().map(|e| e.trim().to_lowercase()) else {
            continue;
        };
        if let Some(existing) = index.get(&email) {
            warn!(
                "Multiple {} records match {}; keeping {}, ignoring {}",
                kind, email, existing.id, record.id
            );
            continue;
        }
        index.insert(email, record);
    }
    index
}

fn index_accounts_by_domain(records: Vec<PersonRecord>) -> BTreeMap<String, PersonRecord> {
    let mut index: BTreeMap<String, PersonRecord> = BTreeMap::new();
    for record in records {
        let Some(domain) = record.website.as_deref().and_then(normalize_domain) else {
            continue;
        };
        if let Some(existing) = index.get(&domain) {
            warn!(
                "Multiple Account records match domain {}; keeping {}, ignoring {}",
                domain, existing.id, record.id
            );
            continue;
        }
        index.insert(domain, record);
    }
    index
}
