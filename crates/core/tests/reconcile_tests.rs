//! Integration tests for batch reconciliation against the in-memory CRM store.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use mailpulse_core::batch::BatchHandler;
use mailpulse_core::events::{EngagementEvent, EventType};
use mailpulse_core::reconcile::{
    EngagementCounters, InMemoryCrmStore, MessageRecord, PersonKind, PersonRecord,
    PrecedencePolicy, Reconciler, UpdateCall,
};
use mailpulse_core::Error;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn open(email: &str, message_id: &str, secs: i64) -> EngagementEvent {
    EngagementEvent::new(email, EventType::Open, ts(secs)).with_message_id(message_id)
}

fn click(email: &str, message_id: &str, secs: i64, url: &str) -> EngagementEvent {
    EngagementEvent::new(email, EventType::Click, ts(secs))
        .with_message_id(message_id)
        .with_url(url)
}

fn message(id: &str, message_id: &str) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        message_id: message_id.to_string(),
        ..Default::default()
    }
}

fn reconciler(store: &Arc<InMemoryCrmStore>, policy: PrecedencePolicy) -> Reconciler {
    Reconciler::new(store.clone(), policy)
}

#[tokio::test]
async fn test_message_counts_add_to_remote_values() {
    let store = Arc::new(
        InMemoryCrmStore::new().with_message(MessageRecord {
            open_count: 5,
            clicked_urls: Some("/a".to_string()),
            ..message("a0M1", "m1")
        }),
    );
    let batch = vec![
        open("jane@acme.com", "m1", 10),
        open("jane@acme.com", "m1", 20),
        open("jane@acme.com", "m1", 5),
        click("jane@acme.com", "m1", 30, "/a"),
        click("jane@acme.com", "m1", 40, "/b"),
    ];

    let summary = reconciler(&store, PrecedencePolicy::LeadOnly)
        .reconcile(&batch)
        .await
        .unwrap();

    let record = store.message("a0M1").unwrap();
    assert_eq!(record.open_count, 8);
    assert_eq!(record.click_count, 2);
    assert_eq!(record.first_opened_at, Some(ts(5)));
    assert_eq!(record.last_clicked_at, Some(ts(40)));
    assert_eq!(record.clicked_urls.as_deref(), Some("/a;/b"));
    assert_eq!(summary.message_updates.succeeded, 1);
    assert_eq!(summary.unmatched_emails, vec!["jane@acme.com".to_string()]);
}

#[tokio::test]
async fn test_unmatched_batch_issues_no_updates() {
    let store = Arc::new(InMemoryCrmStore::new());
    let batch = vec![open("nobody@nowhere.test", "m-unknown", 1)];

    let summary = reconciler(&store, PrecedencePolicy::AccountContactLead)
        .reconcile(&batch)
        .await
        .unwrap();

    assert!(store.update_calls().is_empty());
    assert_eq!(summary.unmatched_messages, vec!["m-unknown".to_string()]);
    assert_eq!(summary.unmatched_emails, vec!["nobody@nowhere.test".to_string()]);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn test_batch_without_aggregatable_events_skips_connect() {
    let store = Arc::new(InMemoryCrmStore::new());
    let batch = vec![EngagementEvent::new("a@x.com", EventType::Other, ts(1))];

    let summary = reconciler(&store, PrecedencePolicy::LeadOnly)
        .reconcile(&batch)
        .await
        .unwrap();

    assert_eq!(summary.events, 1);
    assert_eq!(store.connect_count(), 0);
}

#[tokio::test]
async fn test_auth_failure_drops_batch_without_updates() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_message(message("a0M1", "m1"))
            .fail_connect("INVALID_LOGIN"),
    );

    let result = reconciler(&store, PrecedencePolicy::LeadOnly)
        .reconcile(&[open("jane@acme.com", "m1", 1)])
        .await;

    assert!(matches!(result, Err(Error::Auth(_))));
    assert!(store.update_calls().is_empty());
    assert_eq!(store.message("a0M1").unwrap().open_count, 0);
}

#[tokio::test]
async fn test_lead_only_policy_ignores_contacts() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_person(PersonRecord::new("00Q1", PersonKind::Lead).with_email("jane@acme.com"))
            .with_person(PersonRecord::new("0031", PersonKind::Contact).with_email("jane@acme.com")),
    );

    reconciler(&store, PrecedencePolicy::LeadOnly)
        .reconcile(&[EngagementEvent::new("jane@acme.com", EventType::Open, ts(7))])
        .await
        .unwrap();

    let lead = store.person(PersonKind::Lead, "00Q1").unwrap();
    assert_eq!(lead.counters.open_count, 1);
    assert_eq!(lead.counters.last_opened_at, Some(ts(7)));
    assert_eq!(
        store.person(PersonKind::Contact, "0031").unwrap().counters,
        EngagementCounters::default()
    );
    assert_eq!(
        store.update_calls(),
        vec![UpdateCall::People(PersonKind::Lead, vec!["00Q1".to_string()])]
    );
}

#[tokio::test]
async fn test_account_contact_lead_precedence() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_person(PersonRecord::new("0011", PersonKind::Account).with_website("https://www.acme.com"))
            .with_person(PersonRecord::new("0031", PersonKind::Contact).with_email("jane@acme.com"))
            .with_person(PersonRecord::new("0032", PersonKind::Contact).with_email("bob@beta.io"))
            .with_person(PersonRecord::new("00Q1", PersonKind::Lead).with_email("bob@beta.io"))
            .with_person(PersonRecord::new("00Q2", PersonKind::Lead).with_email("eve@gamma.org")),
    );
    let batch = vec![
        EngagementEvent::new("jane@acme.com", EventType::Open, ts(1)),
        EngagementEvent::new("bob@beta.io", EventType::Open, ts(2)),
        EngagementEvent::new("eve@gamma.org", EventType::Open, ts(3)),
    ];

    let summary = reconciler(&store, PrecedencePolicy::AccountContactLead)
        .reconcile(&batch)
        .await
        .unwrap();

    // acme.com resolves to the account, not the contact with the same email.
    assert_eq!(store.person(PersonKind::Account, "0011").unwrap().counters.open_count, 1);
    assert_eq!(store.person(PersonKind::Contact, "0031").unwrap().counters.open_count, 0);
    // No account for beta.io: the contact beats the lead.
    assert_eq!(store.person(PersonKind::Contact, "0032").unwrap().counters.open_count, 1);
    assert_eq!(store.person(PersonKind::Lead, "00Q1").unwrap().counters.open_count, 0);
    // Only a lead exists for gamma.org.
    assert_eq!(store.person(PersonKind::Lead, "00Q2").unwrap().counters.open_count, 1);
    assert!(summary.unmatched_emails.is_empty());
}

#[tokio::test]
async fn test_account_domain_matching_ignores_over_matches() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_person(PersonRecord::new("0011", PersonKind::Account).with_website("notacme.com"))
            .with_person(PersonRecord::new("0031", PersonKind::Contact).with_email("jane@acme.com")),
    );

    reconciler(&store, PrecedencePolicy::AccountContactLead)
        .reconcile(&[EngagementEvent::new("jane@acme.com", EventType::Open, ts(1))])
        .await
        .unwrap();

    assert_eq!(store.person(PersonKind::Account, "0011").unwrap().counters.open_count, 0);
    assert_eq!(store.person(PersonKind::Contact, "0031").unwrap().counters.open_count, 1);
}

#[tokio::test]
async fn test_several_emails_on_one_account_are_summed() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_person(PersonRecord::new("0011", PersonKind::Account).with_website("acme.com")),
    );
    let batch = vec![
        EngagementEvent::new("jane@acme.com", EventType::Open, ts(1)),
        EngagementEvent::new("bob@acme.com", EventType::Open, ts(9)),
        EngagementEvent::new("bob@acme.com", EventType::Click, ts(4)).with_url("/pricing"),
    ];

    reconciler(&store, PrecedencePolicy::AccountContactLead)
        .reconcile(&batch)
        .await
        .unwrap();

    let account = store.person(PersonKind::Account, "0011").unwrap();
    assert_eq!(account.counters.open_count, 2);
    assert_eq!(account.counters.click_count, 1);
    assert_eq!(account.counters.last_opened_at, Some(ts(9)));
    assert_eq!(account.counters.last_clicked_url.as_deref(), Some("/pricing"));
    assert_eq!(store.update_calls().len(), 1);
}

#[tokio::test]
async fn test_lead_with_account_rollup() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_person(PersonRecord::new("0011", PersonKind::Account).with_website("acme.com"))
            .with_person(
                PersonRecord::new("0031", PersonKind::Contact)
                    .with_email("jane@acme.com")
                    .with_account_id("0011"),
            )
            .with_person(PersonRecord::new("00Q1", PersonKind::Lead).with_email("sam@solo.dev")),
    );
    let batch = vec![
        EngagementEvent::new("jane@acme.com", EventType::Click, ts(5)).with_url("/docs"),
        EngagementEvent::new("sam@solo.dev", EventType::Open, ts(6)),
    ];

    reconciler(&store, PrecedencePolicy::LeadWithAccountRollup)
        .reconcile(&batch)
        .await
        .unwrap();

    let account = store.person(PersonKind::Account, "0011").unwrap();
    assert_eq!(account.counters.click_count, 1);
    assert_eq!(account.counters.last_clicked_url.as_deref(), Some("/docs"));
    // The contact itself is not updated under this policy.
    assert_eq!(store.person(PersonKind::Contact, "0031").unwrap().counters.click_count, 0);
    assert_eq!(store.person(PersonKind::Lead, "00Q1").unwrap().counters.open_count, 1);
}

#[tokio::test]
async fn test_rejected_record_does_not_fail_the_rest() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_message(message("a0M1", "m1"))
            .with_message(message("a0M2", "m2"))
            .reject_update("a0M2"),
    );
    let batch = vec![open("a@x.com", "m1", 1), open("b@x.com", "m2", 2)];

    let summary = reconciler(&store, PrecedencePolicy::LeadOnly)
        .reconcile(&batch)
        .await
        .unwrap();

    assert_eq!(summary.message_updates.attempted, 2);
    assert_eq!(summary.message_updates.succeeded, 1);
    assert_eq!(summary.message_updates.failures[0].id, "a0M2");
    assert_eq!(store.message("a0M1").unwrap().open_count, 1);
    assert_eq!(store.message("a0M2").unwrap().open_count, 0);
}

#[tokio::test]
async fn test_message_flow_failure_does_not_block_person_flow() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_message(message("a0M1", "m1"))
            .with_person(PersonRecord::new("00Q1", PersonKind::Lead).with_email("a@x.com"))
            .fail_message_queries(),
    );

    let summary = reconciler(&store, PrecedencePolicy::LeadOnly)
        .reconcile(&[open("a@x.com", "m1", 1)])
        .await
        .unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("messages:"));
    assert_eq!(store.person(PersonKind::Lead, "00Q1").unwrap().counters.open_count, 1);
}

#[tokio::test]
async fn test_failing_record_type_does_not_block_others() {
    let store = Arc::new(
        InMemoryCrmStore::new()
            .with_person(PersonRecord::new("0011", PersonKind::Account).with_website("acme.com"))
            .with_person(PersonRecord::new("00Q1", PersonKind::Lead).with_email("sam@solo.dev"))
            .fail_updates_for(PersonKind::Account),
    );
    let batch = vec![
        EngagementEvent::new("jane@acme.com", EventType::Open, ts(1)),
        EngagementEvent::new("sam@solo.dev", EventType::Open, ts(2)),
    ];

    let summary = reconciler(&store, PrecedencePolicy::AccountContactLead)
        .reconcile(&batch)
        .await
        .unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.person_updates[&PersonKind::Account].succeeded, 0);
    assert_eq!(summary.person_updates[&PersonKind::Lead].succeeded, 1);
    assert_eq!(store.person(PersonKind::Lead, "00Q1").unwrap().counters.open_count, 1);
}

#[tokio::test]
async fn test_handler_swallows_connect_failure() {
    let store = Arc::new(InMemoryCrmStore::new().fail_connect("expired password"));
    let handler = reconciler(&store, PrecedencePolicy::LeadOnly);

    handler.handle(vec![open("a@x.com", "m1", 1)]).await;

    assert_eq!(store.connect_count(), 1);
    assert!(store.update_calls().is_empty());
}
