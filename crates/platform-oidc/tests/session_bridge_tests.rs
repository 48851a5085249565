//! Session service bridge tests.
//!
//! The session service is simulated with wiremock; these tests pin down
//! which answers count as a created session.

use chrono::{TimeZone, Utc};
use platform_oidc::{AuthFlowResult, IdToken, OidcError, OidcServiceConfig, SessionIssuer};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATE_SECRET: &str = "test-secret-key-for-state-signing-minimum-32-chars";

fn flow_result() -> AuthFlowResult {
    AuthFlowResult {
        id_token: IdToken {
            issuer: "https://idp.example.com".to_string(),
            audience: vec!["client-id".to_string()],
            subject: "user-123".to_string(),
            expiry: Utc.timestamp_opt(1_900_000_000, 0).unwrap(),
            issued_at: Utc.timestamp_opt(1_800_000_000, 0).unwrap(),
            nonce: "nonce-abc".to_string(),
            access_token_hash: String::new(),
        },
        claims: HashMap::from([
            ("sub".to_string(), json!("user-123")),
            ("email".to_string(), json!("user@example.com")),
        ]),
    }
}

fn issuer_for(server: &MockServer) -> SessionIssuer {
    let mut config = OidcServiceConfig::with_secret(STATE_SECRET);
    config.session_service_address = server.address().to_string();
    SessionIssuer::new(config.http_client().unwrap(), config.session_endpoint())
}

#[tokio::test]
async fn test_single_cookie_creates_session() {
    let server = MockServer::start().await;
    let organization_id = Uuid::now_v7();

    Mock::given(method("POST"))
        .and(path("/session"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "organizationId": organization_id.to_string(),
            "idToken": {
                "Issuer": "https://idp.example.com",
                "Subject": "user-123",
                "Audience": ["client-id"]
            },
            "claims": { "email": "user@example.com" }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "_relay_session=sess-1; Path=/; HttpOnly"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cookie = issuer_for(&server)
        .create_session(&flow_result(), organization_id)
        .await
        .unwrap();

    assert_eq!(cookie.name, "_relay_session");
    assert_eq!(cookie.value, "sess-1");
}

#[tokio::test]
async fn test_two_cookies_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "_relay_session=sess-1; Path=/")
                .append_header("set-cookie", "_relay_session_2=sess-2; Path=/"),
        )
        .mount(&server)
        .await;

    let result = issuer_for(&server)
        .create_session(&flow_result(), Uuid::now_v7())
        .await;

    assert!(matches!(result, Err(OidcError::UnexpectedCookieCount(2))));
}

#[tokio::test]
async fn test_no_cookie_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = issuer_for(&server)
        .create_session(&flow_result(), Uuid::now_v7())
        .await;

    assert!(matches!(result, Err(OidcError::UnexpectedCookieCount(0))));
}

#[tokio::test]
async fn test_non_ok_status_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("internal details: user table locked")
                .insert_header("set-cookie", "_relay_session=sess-1"),
        )
        .mount(&server)
        .await;

    let err = issuer_for(&server)
        .create_session(&flow_result(), Uuid::now_v7())
        .await
        .unwrap_err();

    assert!(matches!(err, OidcError::SessionCreationFailed { status: 500 }));
    assert!(!err.to_string().contains("user table"));
    assert_eq!(err.public_message(), platform_oidc::AUTHENTICATION_FAILED);
}

#[tokio::test]
async fn test_created_status_is_not_ok() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(201).insert_header("set-cookie", "_relay_session=sess-1"),
        )
        .mount(&server)
        .await;

    let result = issuer_for(&server)
        .create_session(&flow_result(), Uuid::now_v7())
        .await;

    assert!(matches!(result, Err(OidcError::SessionCreationFailed { status: 201 })));
}

#[tokio::test]
async fn test_unreachable_session_service() {
    let server = MockServer::start().await;
    let address = server.address().to_string();
    drop(server);

    let mut config = OidcServiceConfig::with_secret(STATE_SECRET);
    config.session_service_address = address;
    config.outbound_timeout_secs = 1;
    let issuer = SessionIssuer::new(config.http_client().unwrap(), config.session_endpoint());

    let result = issuer.create_session(&flow_result(), Uuid::now_v7()).await;
    assert!(matches!(result, Err(OidcError::SessionCreationFailed { status: 0 })));
}
