use std::time::Duration;

use mailpulse_core::errors::{CrmError, Error};
use mailpulse_core::reconcile::{CrmStore, MessageRecord};
use mailpulse_crm::{CrmClient, CrmCredentials};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION_ID: &str = "00D5g000001!AQ4AQH.session";
const LOGIN_PATH: &str = "/services/Soap/u/59.0";
const QUERY_PATH: &str = "/services/data/v59.0/query";
const COMPOSITE_PATH: &str = "/services/data/v59.0/composite/sobjects";

fn login_ok(server: &MockServer) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:partner.soap.sforce.com">
<soapenv:Body><loginResponse><result>
<serverUrl>{}/services/Soap/u/59.0/00D5g000001</serverUrl>
<sessionId>{}</sessionId>
</result></loginResponse></soapenv:Body></soapenv:Envelope>"#,
        server.uri(),
        SESSION_ID
    )
}

const LOGIN_FAULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
<soapenv:Body><soapenv:Fault><faultcode>sf:INVALID_LOGIN</faultcode>
<faultstring>INVALID_LOGIN: Invalid username, password, security token; or user locked out.</faultstring>
</soapenv:Fault></soapenv:Body></soapenv:Envelope>"#;

fn client_for(server: &MockServer) -> CrmClient {
    let credentials = CrmCredentials {
        login_url: server.uri(),
        username: "ops@acme.com".to_string(),
        password: "secret".to_string(),
        security_token: "TOKEN".to_string(),
        api_version: "59.0".to_string(),
    };
    CrmClient::new(credentials, Duration::from_secs(5)).unwrap()
}

async fn connected_client(server: &MockServer) -> CrmClient {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_ok(server)))
        .mount(server)
        .await;
    let client = client_for(server);
    client.connect().await.unwrap();
    client
}

fn message(n: usize) -> MessageRecord {
    MessageRecord {
        id: format!("a0M{:04}", n),
        message_id: format!("m{}", n),
        open_count: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_query_follows_next_records_url() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(header("Authorization", format!("Bearer {}", SESSION_ID).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 2,
            "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01gD0000002HU6KIAW-2000",
            "records": [{"Id": "a0M1", "Message_Id__c": "m1", "Open_Count__c": 4.0}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/query/01gD0000002HU6KIAW-2000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 2,
            "done": true,
            "records": [{"Id": "a0M2", "Message_Id__c": "m2", "Click_Count__c": 1.0}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let messages = client
        .find_messages(&["m1".to_string(), "m2".to_string()])
        .await
        .unwrap();

    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a0M1", "a0M2"]);
    assert_eq!(messages[0].open_count, 4);
    assert_eq!(messages[1].click_count, 1);

    let requests = server.received_requests().await.unwrap();
    let first_query = requests
        .iter()
        .find(|r| r.url.path() == QUERY_PATH)
        .unwrap();
    let soql = first_query
        .url
        .query_pairs()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert!(soql.contains("FROM Email_Message__c WHERE Message_Id__c IN ('m1', 'm2')"));
}

#[tokio::test]
async fn test_failed_update_chunk_marks_its_records_and_continues() {
    let server = MockServer::start().await;
    let client = connected_client(&server).await;

    // First composite call fails outright, the second goes through.
    Mock::given(method("PATCH"))
        .and(path(COMPOSITE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!([
            {"message": "Something broke", "errorCode": "UNKNOWN_EXCEPTION"}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(COMPOSITE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a0M0200", "success": true, "errors": []}
        ])))
        .mount(&server)
        .await;

    let records: Vec<MessageRecord> = (0..201).map(message).collect();
    let results = client.update_messages(&records).await.unwrap();

    assert_eq!(results.len(), 201);
    assert!(results[..200].iter().all(|r| !r.success));
    assert_eq!(results[0].id, "a0M0000");
    assert!(results[0].errors[0].contains("UNKNOWN_EXCEPTION: Something broke"));
    assert!(results[200].success);
    assert_eq!(results[200].id, "a0M0200");

    let patches: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == COMPOSITE_PATH)
        .collect();
    assert_eq!(patches.len(), 2);
    let first: serde_json::Value = serde_json::from_slice(&patches[0].body).unwrap();
    assert_eq!(first["allOrNone"], false);
    assert_eq!(first["records"].as_array().unwrap().len(), 200);
    assert_eq!(first["records"][0]["attributes"]["type"], "Email_Message__c");
}

#[tokio::test]
async fn test_login_fault_is_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(header("SOAPAction", "login"))
        .respond_with(ResponseTemplate::new(500).set_body_string(LOGIN_FAULT))
        .mount(&server)
        .await;
    let client = client_for(&server);

    match client.connect().await {
        Err(Error::Auth(message)) => {
            assert!(message.contains("500"));
            assert!(message.contains("INVALID_LOGIN"));
        }
        other => panic!("expected auth error, got {:?}", other),
    }

    let result = client.find_messages(&["m1".to_string()]).await;
    assert!(matches!(result, Err(Error::Crm(CrmError::NotConnected))));
}
