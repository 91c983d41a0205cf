//! Remote object and field names.
//!
//! Engagement fields are custom fields whose names differ between orgs, so
//! they are carried in a [`FieldMap`] rather than hard-coded in queries.

use mailpulse_core::reconcile::PersonKind;

/// Field names on the message-level object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFields {
    pub object: String,
    pub message_id: String,
    pub open_count: String,
    pub click_count: String,
    pub first_opened_at: String,
    pub last_clicked_at: String,
    pub clicked_urls: String,
    pub bounced_at: String,
    pub bounce_reason: String,
}

impl Default for MessageFields {
    fn default() -> Self {
        Self {
            object: "Email_Message__c".to_string(),
            message_id: "Message_Id__c".to_string(),
            open_count: "Open_Count__c".to_string(),
            click_count: "Click_Count__c".to_string(),
            first_opened_at: "First_Opened__c".to_string(),
            last_clicked_at: "Last_Clicked__c".to_string(),
            clicked_urls: "Clicked_URLs__c".to_string(),
            bounced_at: "Bounced_At__c".to_string(),
            bounce_reason: "Bounce_Reason__c".to_string(),
        }
    }
}

impl MessageFields {
    pub fn select_list(&self) -> String {
        [
            "Id",
            self.message_id.as_str(),
            self.open_count.as_str(),
            self.click_count.as_str(),
            self.first_opened_at.as_str(),
            self.last_clicked_at.as_str(),
            self.clicked_urls.as_str(),
            self.bounced_at.as_str(),
            self.bounce_reason.as_str(),
        ]
        .join(", ")
    }
}

/// Engagement counter fields shared by leads, contacts and accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterFields {
    pub open_count: String,
    pub click_count: String,
    pub last_opened_at: String,
    pub last_clicked_at: String,
    pub last_clicked_url: String,
    pub last_bounced_at: String,
    pub last_bounce_reason: String,
}

impl Default for CounterFields {
    fn default() -> Self {
        Self {
            open_count: "Email_Open_Count__c".to_string(),
            click_count: "Email_Click_Count__c".to_string(),
            last_opened_at: "Last_Email_Open__c".to_string(),
            last_clicked_at: "Last_Email_Click__c".to_string(),
            last_clicked_url: "Last_Clicked_URL__c".to_string(),
            last_bounced_at: "Last_Email_Bounce__c".to_string(),
            last_bounce_reason: "Last_Bounce_Reason__c".to_string(),
        }
    }
}

impl CounterFields {
    pub fn select_list(&self) -> String {
        [
            self.open_count.as_str(),
            self.click_count.as_str(),
            self.last_opened_at.as_str(),
            self.last_clicked_at.as_str(),
            self.last_clicked_url.as_str(),
            self.last_bounced_at.as_str(),
            self.last_bounce_reason.as_str(),
        ]
        .join(", ")
    }
}

/// Every remote name the client reads or writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    pub message: MessageFields,
    pub counters: CounterFields,
}

impl FieldMap {
    /// Identity fields selected alongside the counters for a person kind.
    pub fn identity_fields(&self, kind: PersonKind) -> &'static str {
        match kind {
            PersonKind::Lead => "Id, Email",
            PersonKind::Contact => "Id, Email, AccountId",
            PersonKind::Account => "Id, Website",
        }
    }

    pub fn person_select_list(&self, kind: PersonKind) -> String {
        format!("{}, {}", self.identity_fields(kind), self.counters.select_list())
    }
}

/// Quotes a value as a SOQL string literal.
pub fn soql_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// `('a', 'b')` list for an `IN` clause.
pub fn soql_in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| soql_quote(v)).collect();
    format!("({})", quoted.join(", "))
}

/// Escapes `LIKE` wildcards on top of regular quoting.
pub fn soql_like_contains(value: &str) -> String {
    let quoted = soql_quote(value);
    let inner = quoted[1..quoted.len() - 1]
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("'%{}%'", inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soql_quote_escapes() {
        assert_eq!(soql_quote("o'brien@x.com"), r"'o\'brien@x.com'");
        assert_eq!(soql_quote(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_soql_in_list() {
        let values = vec!["a@x.com".to_string(), "b@x.com".to_string()];
        assert_eq!(soql_in_list(&values), "('a@x.com', 'b@x.com')");
    }

    #[test]
    fn test_soql_like_contains() {
        assert_eq!(soql_like_contains("acme.com"), "'%acme.com%'");
        assert_eq!(soql_like_contains("my_co"), r"'%my\_co%'");
    }

    #[test]
    fn test_person_select_list() {
        let fields = FieldMap::default();
        let select = fields.person_select_list(PersonKind::Contact);
        assert!(select.starts_with("Id, Email, AccountId, Email_Open_Count__c"));
        assert!(select.ends_with("Last_Bounce_Reason__c"));
    }
}
