//! Login flow completion
//!
//! On callback the authorization code is exchanged for tokens and the ID
//! token is verified. Steps run in a fixed order and the first failure ends
//! the flow:
//!
//! 1. extract the raw ID token from the token response
//! 2. rediscover the provider, verify signature, issuer, audience and expiry
//! 3. decode the claims
//! 4. compare the nonce claim with the nonce issued at start
//!
//! The nonce is only read from a token whose signature has been verified.

use crate::client::{ClientConfig, OidcTokenResponse};
use crate::discovery;
use crate::error::{OidcError, OidcResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use oauth2::{AuthorizationCode, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, instrument, warn};

/// Clock skew tolerated on `exp`/`iat`, in seconds.
pub const ID_TOKEN_LEEWAY_SECS: u64 = 60;

/// Query parameters of the provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// Signed state token
    pub state: String,

    /// Authorization code
    pub code: String,
}

impl CallbackParams {
    /// Extract `state` and `code` from callback query parameters.
    ///
    /// A missing state is an `InvalidState`; a missing code means the
    /// provider did not complete the authorization.
    pub fn from_query<I, K, V>(pairs: I) -> OidcResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut state = None;
        let mut code = None;

        for (key, value) in pairs {
            match key.as_ref() {
                "state" => state = Some(value.as_ref().to_string()),
                "code" => code = Some(value.as_ref().to_string()),
                _ => {}
            }
        }

        let state = state
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OidcError::InvalidState("missing state parameter".to_string()))?;
        let code = code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OidcError::InvalidRequest("missing code parameter".to_string()))?;

        Ok(Self { state, code })
    }
}

/// Outcome of the authorization code exchange.
#[derive(Debug, Clone)]
pub struct OAuth2Result {
    /// Token endpoint response
    pub token: OidcTokenResponse,
}

impl OAuth2Result {
    /// Raw ID token, if the provider returned one.
    pub fn id_token(&self) -> Option<&str> {
        self.token.extra_fields().id_token.as_deref()
    }
}

/// Inputs to [`authenticate`].
#[derive(Debug, Clone, Copy)]
pub struct AuthenticateParams<'a> {
    /// Configuration resolved from the callback state
    pub config: &'a ClientConfig,

    /// Token response from the code exchange
    pub oauth2_result: &'a OAuth2Result,

    /// Nonce the caller kept since flow start
    pub nonce_cookie_value: &'a str,
}

/// Standard fields of a verified ID token.
///
/// Field names follow the session service's expected payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdToken {
    /// Issuer
    pub issuer: String,

    /// Audience
    pub audience: Vec<String>,

    /// Subject at the provider
    pub subject: String,

    /// Expiry
    pub expiry: DateTime<Utc>,

    /// Issued at
    pub issued_at: DateTime<Utc>,

    /// Nonce (empty if absent)
    pub nonce: String,

    /// Access token hash (empty if absent)
    pub access_token_hash: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct StandardClaims {
    iss: String,
    sub: String,
    aud: Audience,
    exp: f64,
    #[serde(default)]
    iat: Option<f64>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    at_hash: Option<String>,
}

fn timestamp(seconds: f64, claim: &str) -> OidcResult<DateTime<Utc>> {
    DateTime::from_timestamp(seconds as i64, 0)
        .ok_or_else(|| OidcError::ClaimsDecodeFailed(format!("{} out of range", claim)))
}

impl IdToken {
    /// Decode the standard fields from a verified claim set.
    pub fn from_claims(claims: &HashMap<String, Value>) -> OidcResult<Self> {
        let object = Value::Object(claims.clone().into_iter().collect());
        let standard: StandardClaims = serde_json::from_value(object)
            .map_err(|e| OidcError::ClaimsDecodeFailed(e.to_string()))?;

        let audience = match standard.aud {
            Audience::One(aud) => vec![aud],
            Audience::Many(aud) => aud,
        };

        Ok(Self {
            issuer: standard.iss,
            audience,
            subject: standard.sub,
            expiry: timestamp(standard.exp, "exp")?,
            issued_at: match standard.iat {
                Some(iat) => timestamp(iat, "iat")?,
                None => DateTime::<Utc>::UNIX_EPOCH,
            },
            nonce: standard.nonce.unwrap_or_default(),
            access_token_hash: standard.at_hash.unwrap_or_default(),
        })
    }
}

/// Verified identity ready for session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFlowResult {
    /// Standard ID token fields
    pub id_token: IdToken,

    /// Full claim set
    pub claims: HashMap<String, Value>,
}

impl AuthFlowResult {
    /// Get a string claim.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

async fn send_oauth2_request(
    http: reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = http
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().to_owned();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

/// Exchange an authorization code at the provider's token endpoint.
///
/// `redirect_url` must be the one used when the flow was started.
#[instrument(skip(http, config, code), fields(config_id = %config.id))]
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &ClientConfig,
    code: &str,
    redirect_url: &str,
) -> OidcResult<OAuth2Result> {
    let client = config.oauth2_client(redirect_url)?;

    let token = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .request_async(|request| send_oauth2_request(http.clone(), request))
        .await
        .map_err(|e| {
            error!(error = %e, "Authorization code exchange failed");
            OidcError::TokenExchangeFailed
        })?;

    Ok(OAuth2Result { token })
}

/// Verify the ID token of a completed code exchange.
#[instrument(skip(http, params), fields(config_id = %params.config.id))]
pub async fn authenticate(
    http: &reqwest::Client,
    params: AuthenticateParams<'_>,
) -> OidcResult<AuthFlowResult> {
    let raw_id_token = params
        .oauth2_result
        .id_token()
        .ok_or(OidcError::MissingIdToken)?;

    let claims = verify_id_token(http, params.config, raw_id_token).await?;
    let id_token = IdToken::from_claims(&claims)?;

    if params.nonce_cookie_value.is_empty() || id_token.nonce != params.nonce_cookie_value {
        warn!(subject = %id_token.subject, "ID token nonce mismatch");
        return Err(OidcError::NonceMismatch);
    }

    debug!(subject = %id_token.subject, "ID token verified");
    Ok(AuthFlowResult { id_token, claims })
}

/// Verify signature, issuer, audience and expiry and return the claim set.
async fn verify_id_token(
    http: &reqwest::Client,
    config: &ClientConfig,
    raw_id_token: &str,
) -> OidcResult<HashMap<String, Value>> {
    let header = decode_header(raw_id_token)
        .map_err(|e| OidcError::TokenVerificationFailed(format!("Malformed header: {}", e)))?;

    // Provider keys are asymmetric; an HMAC header here is a downgrade attempt.
    if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
        return Err(OidcError::TokenVerificationFailed(format!(
            "Algorithm {:?} not accepted",
            header.alg
        )));
    }

    let metadata = discovery::discover(http, &config.issuer).await.map_err(|e| {
        error!(error = %e, "Failed to initialize provider");
        OidcError::TokenVerificationFailed("Failed to initialize provider".to_string())
    })?;

    let alg_name = format!("{:?}", header.alg);
    if !metadata.id_token_signing_alg_values_supported.is_empty()
        && !metadata
            .id_token_signing_alg_values_supported
            .iter()
            .any(|alg| alg == &alg_name)
    {
        return Err(OidcError::TokenVerificationFailed(format!(
            "Algorithm {} not supported by provider",
            alg_name
        )));
    }

    let jwks = discovery::fetch_jwks(http, &metadata.jwks_uri)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to fetch provider keys");
            OidcError::TokenVerificationFailed("Failed to fetch provider keys".to_string())
        })?;

    let jwk = match header.kid.as_deref() {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
    .ok_or_else(|| OidcError::TokenVerificationFailed("No matching signing key".to_string()))?;

    let decoding_key = DecodingKey::from_jwk(jwk)
        .map_err(|e| OidcError::TokenVerificationFailed(format!("Invalid provider key: {}", e)))?;

    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[config.issuer.as_str()]);
    validation.set_audience(&[&config.verifier.client_id]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.leeway = ID_TOKEN_LEEWAY_SECS;

    let token_data = decode::<HashMap<String, Value>>(raw_id_token, &decoding_key, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::Json(_) => OidcError::ClaimsDecodeFailed(e.to_string()),
            ErrorKind::ExpiredSignature => {
                OidcError::TokenVerificationFailed("Token expired".to_string())
            }
            ErrorKind::InvalidSignature => {
                OidcError::TokenVerificationFailed("Invalid signature".to_string())
            }
            ErrorKind::InvalidIssuer => {
                OidcError::TokenVerificationFailed("Invalid issuer".to_string())
            }
            ErrorKind::InvalidAudience => {
                OidcError::TokenVerificationFailed("Invalid audience".to_string())
            }
            _ => OidcError::TokenVerificationFailed(e.to_string()),
        })?;

    check_authorized_party(&token_data.claims, &config.verifier.client_id)?;

    Ok(token_data.claims)
}

/// With several audiences, `azp` (if present) must name this client.
fn check_authorized_party(claims: &HashMap<String, Value>, client_id: &str) -> OidcResult<()> {
    let multiple_audiences = matches!(claims.get("aud"), Some(Value::Array(aud)) if aud.len() > 1);
    match claims.get("azp").and_then(Value::as_str) {
        Some(azp) if multiple_audiences && azp != client_id => Err(
            OidcError::TokenVerificationFailed("Invalid authorized party".to_string()),
        ),
        _ => Ok(()),
    }
}
