//! Conversion between remote JSON records and the core record views.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use log::warn;
use serde_json::{json, Map, Value};

use mailpulse_core::reconcile::{
    EngagementCounters, MessageRecord, PersonKind, PersonRecord, TimestampField,
};

use crate::schema::{CounterFields, MessageFields};

pub(crate) fn message_from_json(fields: &MessageFields, record: &Value) -> Option<MessageRecord> {
    let id = string_field(record, "Id")?;
    let message_id = string_field(record, &fields.message_id)?;

    let mut unreadable = BTreeSet::new();
    let mut timestamp = |name: &str, field| datetime_field(record, name, field, &mut unreadable);
    let first_opened_at = timestamp(&fields.first_opened_at, TimestampField::FirstOpened);
    let last_clicked_at = timestamp(&fields.last_clicked_at, TimestampField::LastClicked);
    let bounced_at = timestamp(&fields.bounced_at, TimestampField::Bounced);

    Some(MessageRecord {
        id,
        message_id,
        open_count: count_field(record, &fields.open_count),
        click_count: count_field(record, &fields.click_count),
        first_opened_at,
        last_clicked_at,
        clicked_urls: string_field(record, &fields.clicked_urls),
        bounced_at,
        bounce_reason: string_field(record, &fields.bounce_reason),
        unreadable,
    })
}

pub(crate) fn person_from_json(
    fields: &CounterFields,
    kind: PersonKind,
    record: &Value,
) -> Option<PersonRecord> {
    let mut person = PersonRecord::new(string_field(record, "Id")?, kind);
    person.email = string_field(record, "Email");
    person.website = string_field(record, "Website");
    person.account_id = string_field(record, "AccountId");

    let mut unreadable = BTreeSet::new();
    let mut timestamp = |name: &str, field| datetime_field(record, name, field, &mut unreadable);
    let last_opened_at = timestamp(&fields.last_opened_at, TimestampField::LastOpened);
    let last_clicked_at = timestamp(&fields.last_clicked_at, TimestampField::LastClicked);
    let last_bounced_at = timestamp(&fields.last_bounced_at, TimestampField::Bounced);

    person.counters = EngagementCounters {
        open_count: count_field(record, &fields.open_count),
        click_count: count_field(record, &fields.click_count),
        last_opened_at,
        last_clicked_at,
        last_clicked_url: string_field(record, &fields.last_clicked_url),
        last_bounced_at,
        last_bounce_reason: string_field(record, &fields.last_bounce_reason),
        unreadable,
    };
    Some(person)
}

/// Update payload for one message record, engagement fields only.
///
/// Timestamps that were unreadable on fetch are left out so the stored value
/// survives.
pub(crate) fn message_to_json(fields: &MessageFields, record: &MessageRecord) -> Value {
    let mut body = Map::new();
    body.insert("attributes".into(), json!({ "type": fields.object }));
    body.insert("id".into(), json!(record.id));
    body.insert(fields.open_count.clone(), json!(record.open_count));
    body.insert(fields.click_count.clone(), json!(record.click_count));
    for (name, field, value) in [
        (&fields.first_opened_at, TimestampField::FirstOpened, record.first_opened_at),
        (&fields.last_clicked_at, TimestampField::LastClicked, record.last_clicked_at),
        (&fields.bounced_at, TimestampField::Bounced, record.bounced_at),
    ] {
        if !record.unreadable.contains(&field) {
            body.insert(name.clone(), datetime_value(value));
        }
    }
    body.insert(fields.clicked_urls.clone(), json!(record.clicked_urls));
    body.insert(fields.bounce_reason.clone(), json!(record.bounce_reason));
    Value::Object(body)
}

/// Update payload for one lead, contact or account, counters only.
pub(crate) fn person_to_json(fields: &CounterFields, record: &PersonRecord) -> Value {
    let counters = &record.counters;
    let mut body = Map::new();
    body.insert("attributes".into(), json!({ "type": record.kind.as_str() }));
    body.insert("id".into(), json!(record.id));
    body.insert(fields.open_count.clone(), json!(counters.open_count));
    body.insert(fields.click_count.clone(), json!(counters.click_count));
    for (name, field, value) in [
        (&fields.last_opened_at, TimestampField::LastOpened, counters.last_opened_at),
        (&fields.last_clicked_at, TimestampField::LastClicked, counters.last_clicked_at),
        (&fields.last_bounced_at, TimestampField::Bounced, counters.last_bounced_at),
    ] {
        if !counters.unreadable.contains(&field) {
            body.insert(name.clone(), datetime_value(value));
        }
    }
    body.insert(fields.last_clicked_url.clone(), json!(counters.last_clicked_url));
    body.insert(fields.last_bounce_reason.clone(), json!(counters.last_bounce_reason));
    Value::Object(body)
}

fn string_field(record: &Value, name: &str) -> Option<String> {
    record
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Number fields come back as floats (`5.0`) and may be null.
fn count_field(record: &Value, name: &str) -> u64 {
    match record.get(name) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Reads a stored timestamp. A value that is present but can't be parsed is
/// recorded in `unreadable` and reads as `None`.
fn datetime_field(
    record: &Value,
    name: &str,
    field: TimestampField,
    unreadable: &mut BTreeSet<TimestampField>,
) -> Option<DateTime<Utc>> {
    let value = match record.get(name) {
        None | Some(Value::Null) => return None,
        Some(Value::String(raw)) if raw.trim().is_empty() => return None,
        Some(value) => value,
    };
    let parsed = value.as_str().and_then(parse_crm_datetime);
    if parsed.is_none() {
        warn!(
            "[CrmApi] Unreadable {} value {} on {}; keeping it as stored",
            name,
            value,
            record.get("Id").and_then(Value::as_str).unwrap_or("?")
        );
        unreadable.insert(field);
    }
    parsed
}

/// Parses the remote datetime format (`2024-03-01T10:00:00.000+0000`), RFC 3339,
/// or a date field (`2024-03-01`, read as midnight UTC).
pub(crate) fn parse_crm_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
    {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn datetime_value(value: Option<DateTime<Utc>>) -> Value {
    match value {
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailpulse_core::aggregate::{ClickRecord, MessageEngagement};
    use mailpulse_core::reconcile::apply_message_engagement;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_message_from_json() {
        let fields = MessageFields::default();
        let record = json!({
            "attributes": {"type": "Email_Message__c"},
            "Id": "a0M000000000001",
            "Message_Id__c": "m1",
            "Open_Count__c": 5.0,
            "Click_Count__c": null,
            "First_Opened__c": "2024-03-01T10:00:00.000+0000",
            "Clicked_URLs__c": "/a;/b",
            "Bounce_Reason__c": ""
        });
        let message = message_from_json(&fields, &record).unwrap();
        assert_eq!(message.id, "a0M000000000001");
        assert_eq!(message.open_count, 5);
        assert_eq!(message.click_count, 0);
        assert_eq!(
            message.first_opened_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(message.clicked_urls.as_deref(), Some("/a;/b"));
        assert_eq!(message.bounce_reason, None);
    }

    #[test]
    fn test_message_without_key_is_skipped() {
        let fields = MessageFields::default();
        assert!(message_from_json(&fields, &json!({"Id": "a0M1"})).is_none());
    }

    #[test]
    fn test_person_round_trips_counters() {
        let fields = CounterFields::default();
        let record = json!({
            "Id": "0031",
            "Email": "jane@acme.com",
            "AccountId": "0011",
            "Email_Open_Count__c": 2,
            "Last_Email_Click__c": "2024-03-01T10:00:00Z",
            "Last_Clicked_URL__c": "/pricing"
        });
        let person = person_from_json(&fields, PersonKind::Contact, &record).unwrap();
        assert_eq!(person.account_id.as_deref(), Some("0011"));
        assert_eq!(person.counters.open_count, 2);

        let payload = person_to_json(&fields, &person);
        assert_eq!(payload["attributes"]["type"], "Contact");
        assert_eq!(payload["Email_Open_Count__c"], 2);
        assert_eq!(payload["Last_Email_Click__c"], "2024-03-01T10:00:00.000Z");
        assert_eq!(payload["Last_Email_Bounce__c"], Value::Null);
        assert!(payload.get("Email").is_none());
    }

    #[test]
    fn test_parse_crm_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_crm_datetime("2024-03-01T10:00:00.000+0000"), Some(expected));
        assert_eq!(parse_crm_datetime("2024-03-01T11:00:00+01:00"), Some(expected));
        assert_eq!(parse_crm_datetime("2024-03-01"), Some(at(2024, 3, 1)));
        assert_eq!(parse_crm_datetime("01/03/2024"), None);
    }

    #[test]
    fn test_date_only_values_survive_a_merge() {
        let fields = MessageFields::default();
        let record = json!({
            "Id": "a0M1",
            "Message_Id__c": "m1",
            "First_Opened__c": "2024-03-01",
            "Last_Clicked__c": "2030-01-01"
        });
        let mut message = message_from_json(&fields, &record).unwrap();
        assert_eq!(message.first_opened_at, Some(at(2024, 3, 1)));
        assert_eq!(message.last_clicked_at, Some(at(2030, 1, 1)));
        assert!(message.unreadable.is_empty());

        let batch_time = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let engagement = MessageEngagement {
            opens: vec![batch_time],
            clicks: vec![ClickRecord {
                occurred_at: batch_time,
                url: Some("/p".to_string()),
            }],
            bounce: None,
        };
        apply_message_engagement(&mut message, &engagement);
        assert_eq!(message.first_opened_at, Some(at(2024, 3, 1)));
        assert_eq!(message.last_clicked_at, Some(at(2030, 1, 1)));
        assert_eq!(message.open_count, 1);
    }

    #[test]
    fn test_unreadable_timestamp_is_kept_as_stored() {
        let fields = MessageFields::default();
        let record = json!({
            "Id": "a0M1",
            "Message_Id__c": "m1",
            "First_Opened__c": "last tuesday",
            "Last_Clicked__c": 1700000000
        });
        let mut message = message_from_json(&fields, &record).unwrap();
        assert_eq!(message.first_opened_at, None);
        assert_eq!(
            message.unreadable,
            BTreeSet::from([TimestampField::FirstOpened, TimestampField::LastClicked])
        );

        let batch_time = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let engagement = MessageEngagement {
            opens: vec![batch_time],
            clicks: vec![ClickRecord {
                occurred_at: batch_time,
                url: None,
            }],
            bounce: None,
        };
        apply_message_engagement(&mut message, &engagement);
        assert_eq!(message.first_opened_at, None);
        assert_eq!(message.last_clicked_at, None);

        let payload = message_to_json(&fields, &message);
        assert!(payload.get("First_Opened__c").is_none());
        assert!(payload.get("Last_Clicked__c").is_none());
        assert_eq!(payload["Open_Count__c"], 1);
        assert_eq!(payload["Bounced_At__c"], Value::Null);
    }

    #[test]
    fn test_unreadable_person_timestamp_is_not_written() {
        let fields = CounterFields::default();
        let record = json!({
            "Id": "00Q1",
            "Email": "jane@acme.com",
            "Last_Email_Open__c": "n/a",
            "Last_Email_Click__c": "2024-03-01"
        });
        let person = person_from_json(&fields, PersonKind::Lead, &record).unwrap();
        assert_eq!(person.counters.last_clicked_at, Some(at(2024, 3, 1)));
        assert_eq!(
            person.counters.unreadable,
            BTreeSet::from([TimestampField::LastOpened])
        );

        let payload = person_to_json(&fields, &person);
        assert!(payload.get("Last_Email_Open__c").is_none());
        assert_eq!(payload["Last_Email_Click__c"], "2024-03-01T00:00:00.000Z");
    }
}
