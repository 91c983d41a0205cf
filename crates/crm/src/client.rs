//! HTTP client for the remote CRM.
//!
//! Logs in through the SOAP partner endpoint, reads through the REST query
//! endpoint and writes through the composite sObject collection endpoint.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use mailpulse_core::errors::{CrmError, Error, Result};
use mailpulse_core::reconcile::{CrmStore, MessageRecord, PersonKind, PersonRecord, RecordResult};

use crate::records::{message_from_json, message_to_json, person_from_json, person_to_json};
use crate::schema::{soql_in_list, soql_like_contains, FieldMap};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

pub const DEFAULT_API_VERSION: &str = "59.0";

/// Maximum records per composite update call.
const UPDATE_CHUNK_SIZE: usize = 200;

/// Maximum values per `IN (...)` clause, keeping query URLs short.
const QUERY_CHUNK_SIZE: usize = 100;

/// Maximum domains per `LIKE` disjunction.
const DOMAIN_CHUNK_SIZE: usize = 25;

// ─────────────────────────────────────────────────────────────────────────────
// API Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiQueryResponse {
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default = "default_true")]
    done: bool,
    #[serde(default)]
    next_records_url: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, serde::Deserialize)]
struct ApiSaveResult {
    #[serde(default)]
    id: Option<String>,
    success: bool,
    #[serde(default)]
    errors: Vec<ApiSaveError>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSaveError {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    fields: Vec<String>,
}

impl ApiSaveError {
    fn describe(&self) -> String {
        let mut text = match (&self.status_code, &self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "unknown error".to_string(),
        };
        if !self.fields.is_empty() {
            text.push_str(&format!(" [{}]", self.fields.join(", ")));
        }
        text
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Login settings for the remote CRM.
#[derive(Clone)]
pub struct CrmCredentials {
    pub login_url: String,
    pub username: String,
    pub password: String,
    pub security_token: String,
    pub api_version: String,
}

impl std::fmt::Debug for CrmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmCredentials")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl Default for CrmCredentials {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            username: String::new(),
            password: String::new(),
            security_token: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub instance_url: String,
    pub session_id: String,
}

/// Builds the partner `login` envelope.
pub fn login_envelope(username: &str, password: &str, security_token: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<env:Body><n1:login xmlns:n1="urn:partner.soap.sforce.com">"#,
            "<n1:username>{}</n1:username><n1:password>{}{}</n1:password>",
            "</n1:login></env:Body></env:Envelope>"
        ),
        xml_escape(username),
        xml_escape(password),
        xml_escape(security_token)
    )
}

/// Extracts the session from a `loginResponse`, or the fault message.
pub fn parse_login_response(body: &str) -> Result<Session> {
    if let Some(fault) = xml_element(body, "faultstring") {
        return Err(Error::Auth(fault));
    }
    let session_id = xml_element(body, "sessionId")
        .ok_or_else(|| Error::Auth("Login response has no sessionId".to_string()))?;
    let server_url = xml_element(body, "serverUrl")
        .ok_or_else(|| Error::Auth("Login response has no serverUrl".to_string()))?;
    let instance_url = server_url
        .split_once("/services/")
        .map(|(base, _)| base.to_string())
        .unwrap_or(server_url);

    Ok(Session {
        instance_url,
        session_id,
    })
}

/// Text content of the first `<tag>` element, unprefixed.
///
/// Only covers what the login response contains: no CDATA sections, no
/// nested markup inside the element, and only the five predefined entities
/// are decoded.
fn xml_element(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(offset) = body[search_from..].find(&open) {
        let after_name = search_from + offset + open.len();
        match body[after_name..].chars().next() {
            Some('>') | Some(' ') => {
                let content_start = after_name + body[after_name..].find('>')? + 1;
                let content_end = content_start + body[content_start..].find(&close)?;
                return Some(xml_unescape(body[content_start..content_end].trim()));
            }
            _ => search_from = after_name,
        }
    }
    None
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ─────────────────────────────────────────────────────────────────────────────
// CRM Client
// ─────────────────────────────────────────────────────────────────────────────

/// [`CrmStore`] backed by the remote CRM's HTTP APIs.
///
/// `connect` performs a fresh login and replaces the held session; every
/// other call uses the session from the last successful login.
pub struct CrmClient {
    client: reqwest::Client,
    credentials: CrmCredentials,
    fields: FieldMap,
    session: RwLock<Option<Session>>,
}

impl CrmClient {
    pub fn new(credentials: CrmCredentials, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Unexpected(format!("Failed to initialize HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials: CrmCredentials {
                login_url: credentials.login_url.trim_end_matches('/').to_string(),
                ..credentials
            },
            fields: FieldMap::default(),
            session: RwLock::new(None),
        })
    }

    pub fn with_field_map(mut self, fields: FieldMap) -> Self {
        self.fields = fields;
        self
    }

    async fn session(&self) -> Result<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| CrmError::NotConnected.into())
    }

    fn data_url(&self, session: &Session, path: &str) -> String {
        format!(
            "{}/services/data/v{}{}",
            session.instance_url, self.credentials.api_version, path
        )
    }

    fn headers(&self, session: &Session) -> Result<HeaderMap> {
        let auth = HeaderValue::from_str(&format!("Bearer {}", session.session_id))
            .map_err(|e| Error::Auth(format!("Invalid session id: {}", e)))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    async fn login(&self) -> Result<Session> {
        let url = format!(
            "{}/services/Soap/u/{}",
            self.credentials.login_url, self.credentials.api_version
        );
        debug!("[CrmApi] POST {}", url);

        let envelope = login_envelope(
            &self.credentials.username,
            &self.credentials.password,
            &self.credentials.security_token,
        );
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "text/xml; charset=UTF-8")
            .header("SOAPAction", "login")
            .body(envelope)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Login request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Auth(format!("Failed to read login response: {}", e)))?;
        match parse_login_response(&body) {
            Ok(session) => Ok(session),
            Err(e) if status.is_success() => Err(e),
            Err(Error::Auth(fault)) => Err(Error::Auth(format!("HTTP {}: {}", status, fault))),
            Err(e) => Err(e),
        }
    }

    /// Runs a query and follows `nextRecordsUrl` until the result is complete.
    async fn query(&self, session: &Session, soql: &str) -> Result<Vec<Value>> {
        let mut url = self.data_url(session, &format!("/query?q={}", urlencoding::encode(soql)));
        let mut records = Vec::new();
        loop {
            debug!("[CrmApi] GET {}", url);
            let response = self
                .client
                .get(&url)
                .headers(self.headers(session)?)
                .send()
                .await
                .map_err(|e| CrmError::Transport(format!("Query request failed: {}", e)))?;
            let page: ApiQueryResponse = self.parse_response(response).await?;
            records.extend(page.records);

            match page.next_records_url {
                Some(next) if !page.done => url = format!("{}{}", session.instance_url, next),
                _ => break,
            }
        }
        Ok(records)
    }

    /// Queries `values` in chunks, substituting each chunk's `IN` list into `build`.
    async fn query_in_chunks(
        &self,
        values: &[String],
        chunk_size: usize,
        build: impl Fn(&[String]) -> String,
    ) -> Result<Vec<Value>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.session().await?;
        let mut records = Vec::new();
        for chunk in values.chunks(chunk_size) {
            records.extend(self.query(&session, &build(chunk)).await?);
        }
        Ok(records)
    }

    /// Sends update payloads through the composite collection endpoint.
    ///
    /// A chunk that fails as a whole marks each of its records as failed so
    /// later chunks still go out.
    async fn update_records(&self, ids: Vec<String>, payloads: Vec<Value>) -> Result<Vec<RecordResult>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.session().await?;
        let url = self.data_url(&session, "/composite/sobjects");

        let mut results = Vec::with_capacity(payloads.len());
        for (ids, records) in ids
            .chunks(UPDATE_CHUNK_SIZE)
            .zip(payloads.chunks(UPDATE_CHUNK_SIZE))
        {
            debug!("[CrmApi] PATCH {} ({} records)", url, records.len());
            let body = json!({ "allOrNone": false, "records": records });
            let sent = self
                .client
                .patch(&url)
                .headers(self.headers(&session)?)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::from(CrmError::Transport(format!("Update request failed: {}", e))));

            let outcome = match sent {
                Ok(response) => self.parse_response::<Vec<ApiSaveResult>>(response).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(saved) => results.extend(map_save_results(ids, saved)),
                Err(e) => {
                    error!("[CrmApi] Update of {} records failed: {}", ids.len(), e);
                    results.extend(ids.iter().map(|id| RecordResult::failed(id, e.to_string())));
                }
            }
        }
        Ok(results)
    }

    /// Parses an HTTP response, handling errors appropriately.
    async fn parse_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CrmError::Transport(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            // Error bodies are usually a list of {message, errorCode}
            let parsed = serde_json::from_str::<Vec<ApiErrorResponse>>(&body)
                .ok()
                .and_then(|errors| errors.into_iter().next())
                .or_else(|| serde_json::from_str::<ApiErrorResponse>(&body).ok());
            let message = match parsed {
                Some(err) => match (err.error_code, err.message) {
                    (Some(code), Some(message)) => format!("{}: {}", code, message),
                    (code, message) => message.or(code).unwrap_or_else(|| format!("HTTP {}", status)),
                },
                None => body.chars().take(200).collect(),
            };
            return Err(CrmError::Remote {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        serde_json::from_str(&body).map_err(|e| {
            CrmError::Query(format!(
                "Failed to parse response: {} - {}",
                e,
                body.chars().take(200).collect::<String>()
            ))
            .into()
        })
    }
}

/// Pairs composite results with the submitted ids; results come back in
/// request order.
fn map_save_results(ids: &[String], saved: Vec<ApiSaveResult>) -> Vec<RecordResult> {
    if saved.len() != ids.len() {
        warn!(
            "[CrmApi] Expected {} update results, got {}",
            ids.len(),
            saved.len()
        );
    }
    let mut results: Vec<RecordResult> = ids
        .iter()
        .zip(saved)
        .map(|(id, result)| RecordResult {
            id: result.id.unwrap_or_else(|| id.clone()),
            success: result.success,
            errors: result.errors.iter().map(ApiSaveError::describe).collect(),
        })
        .collect();
    // Anything the remote did not report on did not go through.
    for id in ids.iter().skip(results.len()) {
        results.push(RecordResult::failed(id, "No result returned"));
    }
    results
}

#[async_trait]
impl CrmStore for CrmClient {
    async fn connect(&self) -> Result<()> {
        let session = self.login().await?;
        info!("[CrmApi] Logged in to {}", session.instance_url);
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn find_messages(&self, message_ids: &[String]) -> Result<Vec<MessageRecord>> {
        let fields = &self.fields.message;
        let select = fields.select_list();
        let records = self
            .query_in_chunks(message_ids, QUERY_CHUNK_SIZE, |chunk| {
                format!(
                    "SELECT {} FROM {} WHERE {} IN {}",
                    select,
                    fields.object,
                    fields.message_id,
                    soql_in_list(chunk)
                )
            })
            .await?;
        Ok(records
            .iter()
            .filter_map(|r| message_from_json(fields, r))
            .collect())
    }

    async fn find_people_by_email(
        &self,
        kind: PersonKind,
        emails: &[String],
    ) -> Result<Vec<PersonRecord>> {
        let select = self.fields.person_select_list(kind);
        // Converted leads are read-only.
        let extra = if kind == PersonKind::Lead {
            " AND IsConverted = false"
        } else {
            ""
        };
        let records = self
            .query_in_chunks(emails, QUERY_CHUNK_SIZE, |chunk| {
                format!(
                    "SELECT {} FROM {} WHERE Email IN {}{}",
                    select,
                    kind.as_str(),
                    soql_in_list(chunk),
                    extra
                )
            })
            .await?;
        Ok(self.people(kind, &records))
    }

    async fn find_accounts_by_domain(&self, domains: &[String]) -> Result<Vec<PersonRecord>> {
        let select = self.fields.person_select_list(PersonKind::Account);
        let records = self
            .query_in_chunks(domains, DOMAIN_CHUNK_SIZE, |chunk| {
                let clauses: Vec<String> = chunk
                    .iter()
                    .map(|d| format!("Website LIKE {}", soql_like_contains(d)))
                    .collect();
                format!("SELECT {} FROM Account WHERE {}", select, clauses.join(" OR "))
            })
            .await?;
        Ok(self.people(PersonKind::Account, &records))
    }

    async fn find_accounts_by_id(&self, ids: &[String]) -> Result<Vec<PersonRecord>> {
        let select = self.fields.person_select_list(PersonKind::Account);
        let records = self
            .query_in_chunks(ids, QUERY_CHUNK_SIZE, |chunk| {
                format!("SELECT {} FROM Account WHERE Id IN {}", select, soql_in_list(chunk))
            })
            .await?;
        Ok(self.people(PersonKind::Account, &records))
    }

    async fn update_messages(&self, records: &[MessageRecord]) -> Result<Vec<RecordResult>> {
        let ids = records.iter().map(|r| r.id.clone()).collect();
        let payloads = records
            .iter()
            .map(|r| message_to_json(&self.fields.message, r))
            .collect();
        self.update_records(ids, payloads).await
    }

    async fn update_people(
        &self,
        kind: PersonKind,
        records: &[PersonRecord],
    ) -> Result<Vec<RecordResult>> {
        if let Some(other) = records.iter().find(|r| r.kind != kind) {
            return Err(Error::Unexpected(format!(
                "Cannot update {} {} as {}",
                other.kind, other.id, kind
            )));
        }
        let ids = records.iter().map(|r| r.id.clone()).collect();
        let payloads = records
            .iter()
            .map(|r| person_to_json(&self.fields.counters, r))
            .collect();
        self.update_records(ids, payloads).await
    }
}

impl CrmClient {
    fn people(&self, kind: PersonKind, records: &[Value]) -> Vec<PersonRecord> {
        records
            .iter()
            .filter_map(|r| person_from_json(&self.fields.counters, kind, r))
            .collect()
    }
}
