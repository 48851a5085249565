//! Session service bridge
//!
//! Hands a verified identity to the session service, which creates or links
//! the user and answers with exactly one session cookie.

use crate::error::{OidcError, OidcResult};
use crate::verify::AuthFlowResult;
use reqwest::header::SET_COOKIE;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Session cookie returned by the session service.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// Cookie name
    pub name: String,

    /// Cookie value
    pub value: String,

    /// Full `Set-Cookie` header value including attributes
    pub raw: String,
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}

impl SessionCookie {
    /// Parse a `Set-Cookie` header value. Returns `None` when the header
    /// does not start with a valid `name=value` pair.
    pub fn parse(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?.trim();
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();

        if name.is_empty() || !name.chars().all(is_token_char) {
            return None;
        }

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        Some(Self {
            name: name.to_string(),
            value: value.to_string(),
            raw: header.to_string(),
        })
    }
}

/// Body posted to the session service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionPayload<'a> {
    #[serde(flatten)]
    flow_result: &'a AuthFlowResult,
    organization_id: Uuid,
}

/// Client for the session service.
#[derive(Debug, Clone)]
pub struct SessionIssuer {
    http: reqwest::Client,
    endpoint: String,
}

impl SessionIssuer {
    /// Create a session issuer posting to `endpoint`.
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    /// Session endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Create a session for a verified identity within an organization.
    ///
    /// Succeeds only on a 200 answer carrying exactly one cookie. Nothing is
    /// retried.
    #[instrument(skip(self, flow_result), fields(subject = %flow_result.id_token.subject))]
    pub async fn create_session(
        &self,
        flow_result: &AuthFlowResult,
        organization_id: Uuid,
    ) -> OidcResult<SessionCookie> {
        let payload = CreateSessionPayload {
            flow_result,
            organization_id,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Session service request failed");
                OidcError::SessionCreationFailed {
                    status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = status.as_u16(), body = %body, "Session service rejected session creation");
            return Err(OidcError::SessionCreationFailed {
                status: status.as_u16(),
            });
        }

        let mut cookies: Vec<SessionCookie> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(SessionCookie::parse)
            .collect();

        if cookies.len() != 1 {
            error!(count = cookies.len(), "Unexpected count of session cookies");
            return Err(OidcError::UnexpectedCookieCount(cookies.len()));
        }

        debug!(organization_id = %organization_id, "Session created");
        cookies.pop().ok_or(OidcError::UnexpectedCookieCount(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::IdToken;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    #[test]
    fn test_parse_cookie() {
        let cookie =
            SessionCookie::parse("_session=abc123; Path=/; HttpOnly; Secure; SameSite=Lax").unwrap();
        assert_eq!(cookie.name, "_session");
        assert_eq!(cookie.value, "abc123");
        assert!(cookie.raw.contains("HttpOnly"));
    }

    #[test]
    fn test_parse_quoted_cookie() {
        let cookie = SessionCookie::parse("sid=\"quoted\"").unwrap();
        assert_eq!(cookie.value, "quoted");
    }

    #[test]
    fn test_parse_invalid_cookie() {
        assert!(SessionCookie::parse("").is_none());
        assert!(SessionCookie::parse("novalue").is_none());
        assert!(SessionCookie::parse("=value").is_none());
        assert!(SessionCookie::parse("bad name=value").is_none());
    }

    #[test]
    fn test_cookie_debug_redacts_value() {
        let cookie = SessionCookie::parse("_session=secret-session-id").unwrap();
        assert!(!format!("{:?}", cookie).contains("secret-session-id"));
    }

    #[test]
    fn test_payload_shape() {
        let flow_result = AuthFlowResult {
            id_token: IdToken {
                issuer: "https://idp.example.com".to_string(),
                audience: vec!["client-id".to_string()],
                subject: "user-123".to_string(),
                expiry: Utc.timestamp_opt(1_900_000_000, 0).unwrap(),
                issued_at: Utc.timestamp_opt(1_800_000_000, 0).unwrap(),
                nonce: "nonce".to_string(),
                access_token_hash: String::new(),
            },
            claims: HashMap::from([(
                "email".to_string(),
                serde_json::json!("user@example.com"),
            )]),
        };
        let organization_id = Uuid::now_v7();

        let value = serde_json::to_value(CreateSessionPayload {
            flow_result: &flow_result,
            organization_id,
        })
        .unwrap();

        assert_eq!(value["organizationId"], organization_id.to_string());
        assert_eq!(value["idToken"]["Subject"], "user-123");
        assert_eq!(value["claims"]["email"], "user@example.com");
    }
}
