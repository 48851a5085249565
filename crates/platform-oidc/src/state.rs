//! Signed state tokens for the OAuth2 redirect
//!
//! The `state` query parameter carries everything the callback needs to pick
//! the flow back up, so no per-flow data is kept on the server. It is a JWT
//! signed with the service's own key and bounded by a short expiry.

use crate::config::{OidcServiceConfig, StateSigningAlgorithm};
use crate::error::{OidcError, OidcResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

/// Payload carried through the identity provider inside the state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateParams {
    /// Client configuration that started the flow
    pub client_config_id: String,

    /// Where to send the browser once the session exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to_url: Option<String>,

    /// Additional caller data to pass through
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl StateParams {
    /// Create state params for a client configuration.
    pub fn new(client_config_id: impl Into<String>) -> Self {
        Self {
            client_config_id: client_config_id.into(),
            return_to_url: None,
            extra: BTreeMap::new(),
        }
    }

    /// Set the post-login return URL.
    pub fn with_return_to(mut self, url: impl Into<String>) -> Self {
        self.return_to_url = Some(url.into());
        self
    }

    /// Add a pass-through value.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// JWT claims wrapping [`StateParams`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateClaims {
    #[serde(flatten)]
    params: StateParams,

    iss: String,

    aud: String,

    iat: i64,

    exp: i64,

    jti: String,
}

/// Encodes and verifies state tokens.
///
/// Keys are derived once from [`OidcServiceConfig`] and never change
/// afterwards; share the codec behind an `Arc` or by reference.
pub struct StateCodec {
    algorithm: StateSigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry: Duration,
    issuer: String,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("algorithm", &self.algorithm)
            .field("expiry", &self.expiry)
            .field("issuer", &self.issuer)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl StateCodec {
    /// Build a codec from the service configuration.
    ///
    /// Fails with `ConfigError` if the key material does not match the
    /// configured algorithm.
    pub fn new(config: &OidcServiceConfig) -> OidcResult<Self> {
        config.validate()?;

        Ok(Self {
            algorithm: config.state_signing_algorithm,
            encoding_key: Self::create_encoding_key(config)?,
            decoding_key: Self::create_decoding_key(config)?,
            expiry: config.state_expiry()?,
            issuer: config.state_token_issuer.clone(),
        })
    }

    fn create_encoding_key(config: &OidcServiceConfig) -> OidcResult<EncodingKey> {
        use StateSigningAlgorithm::*;

        match config.state_signing_algorithm {
            HS256 | HS384 | HS512 => {
                let secret = config
                    .state_signing_secret
                    .as_ref()
                    .ok_or_else(|| OidcError::ConfigError("Secret required for HMAC".to_string()))?;
                Ok(EncodingKey::from_secret(secret.as_bytes()))
            }
            RS256 | RS512 => {
                let key = config.state_private_key.as_ref().ok_or_else(|| {
                    OidcError::ConfigError("Private key required for RSA".to_string())
                })?;
                EncodingKey::from_rsa_pem(key.as_bytes()).map_err(|e| {
                    OidcError::ConfigError(format!("Invalid RSA private key: {}", e))
                })
            }
            ES256 => {
                let key = config.state_private_key.as_ref().ok_or_else(|| {
                    OidcError::ConfigError("Private key required for EC".to_string())
                })?;
                EncodingKey::from_ec_pem(key.as_bytes())
                    .map_err(|e| OidcError::ConfigError(format!("Invalid EC private key: {}", e)))
            }
        }
    }

    fn create_decoding_key(config: &OidcServiceConfig) -> OidcResult<DecodingKey> {
        use StateSigningAlgorithm::*;

        match config.state_signing_algorithm {
            HS256 | HS384 | HS512 => {
                let secret = config
                    .state_signing_secret
                    .as_ref()
                    .ok_or_else(|| OidcError::ConfigError("Secret required for HMAC".to_string()))?;
                Ok(DecodingKey::from_secret(secret.as_bytes()))
            }
            RS256 | RS512 => {
                let key = config.state_public_key.as_ref().ok_or_else(|| {
                    OidcError::ConfigError("Public key required for RSA".to_string())
                })?;
                DecodingKey::from_rsa_pem(key.as_bytes())
                    .map_err(|e| OidcError::ConfigError(format!("Invalid RSA public key: {}", e)))
            }
            ES256 => {
                let key = config.state_public_key.as_ref().ok_or_else(|| {
                    OidcError::ConfigError("Public key required for EC".to_string())
                })?;
                DecodingKey::from_ec_pem(key.as_bytes())
                    .map_err(|e| OidcError::ConfigError(format!("Invalid EC public key: {}", e)))
            }
        }
    }

    /// Sign state params into an opaque token valid for the configured window.
    pub fn encode(&self, params: &StateParams) -> OidcResult<String> {
        self.encode_at(params, Utc::now())
    }

    pub(crate) fn encode_at(&self, params: &StateParams, issued_at: DateTime<Utc>) -> OidcResult<String> {
        let expires_at = issued_at
            .checked_add_signed(self.expiry)
            .ok_or_else(|| OidcError::ConfigError("State expiry out of range".to_string()))?;

        let claims = StateClaims {
            params: params.clone(),
            iss: self.issuer.clone(),
            aud: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::now_v7().to_string(),
        };

        let header = Header::new(self.algorithm.into());
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| OidcError::ConfigError(format!("Failed to sign state token: {}", e)))
    }

    /// Verify a state token and return its params.
    ///
    /// Signature is checked before anything in the payload is looked at.
    /// Only the configured algorithm is accepted, which also rules out
    /// unsigned tokens.
    pub fn decode(&self, token: &str) -> OidcResult<StateParams> {
        if token.is_empty() {
            return Err(OidcError::InvalidState("missing state".to_string()));
        }

        let mut validation = Validation::new(self.algorithm.into());
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = 0;

        let token_data: TokenData<StateClaims> = decode(token, &self.decoding_key, &validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "expired",
                    ErrorKind::InvalidSignature => "invalid signature",
                    ErrorKind::InvalidAlgorithm => "unexpected algorithm",
                    ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => "foreign token",
                    _ => "malformed",
                };
                warn!(reason, "Rejected state token");
                OidcError::InvalidState(reason.to_string())
            })?;

        Ok(token_data.claims.params)
    }

    /// Validity window of issued tokens.
    pub fn expiry(&self) -> Duration {
        self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn test_secret() -> String {
        "test-secret-key-for-state-signing-minimum-32-chars".to_string()
    }

    fn codec() -> StateCodec {
        StateCodec::new(&OidcServiceConfig::with_secret(test_secret())).unwrap()
    }

    fn params() -> StateParams {
        StateParams::new("cfg-1")
            .with_return_to("https://app.example.com/workspaces")
            .with_extra("flow", "login")
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let token = codec.encode(&params()).unwrap();

        assert_eq!(codec.decode(&token).unwrap(), params());
    }

    #[test]
    fn test_tokens_are_unique() {
        let codec = codec();
        let first = codec.encode(&params()).unwrap();
        let second = codec.encode(&params()).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = codec();
        let issued_at = Utc::now() - codec.expiry() - Duration::seconds(5);
        let token = codec.encode_at(&params(), issued_at).unwrap();

        let result = codec.decode(&token);
        assert!(matches!(result, Err(OidcError::InvalidState(reason)) if reason == "expired"));
    }

    #[test]
    fn test_other_key_rejected() {
        let other = StateCodec::new(&OidcServiceConfig::with_secret(
            "another-secret-key-that-is-long-enough-to-use",
        ))
        .unwrap();
        let token = other.encode(&params()).unwrap();

        assert!(matches!(codec().decode(&token), Err(OidcError::InvalidState(_))));
    }

    #[test]
    fn test_flipped_byte_rejected() {
        let codec = codec();
        let token = codec.encode(&params()).unwrap();

        for index in [5, token.len() / 2, token.len() - 10] {
            let mut bytes = token.clone().into_bytes();
            bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();

            assert!(
                matches!(codec.decode(&tampered), Err(OidcError::InvalidState(_))),
                "tampered byte at {} was accepted",
                index
            );
        }
    }

    #[test]
    fn test_unsigned_token_rejected() {
        let codec = codec();
        let token = codec.encode(&params()).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);

        for candidate in [format!("{}.{}.", header, payload), format!("{}.{}", header, payload)] {
            assert!(matches!(codec.decode(&candidate), Err(OidcError::InvalidState(_))));
        }
    }

    #[test]
    fn test_empty_and_garbage_rejected() {
        let codec = codec();
        assert!(matches!(codec.decode(""), Err(OidcError::InvalidState(_))));
        assert!(matches!(codec.decode("not-a-token"), Err(OidcError::InvalidState(_))));
    }

    #[test]
    fn test_rsa_round_trip() {
        let config = OidcServiceConfig {
            state_signing_algorithm: StateSigningAlgorithm::RS256,
            state_private_key: Some(include_str!("../tests/fixtures/provider_key.pem").to_string()),
            state_public_key: Some(include_str!("../tests/fixtures/provider_key.pub.pem").to_string()),
            ..Default::default()
        };
        let codec = StateCodec::new(&config).unwrap();
        let token = codec.encode(&params()).unwrap();

        assert_eq!(codec.decode(&token).unwrap(), params());
    }

    #[test]
    fn test_oversized_expiry_rejected_at_construction() {
        for secs in [10_000_000_000_000, u64::MAX] {
            let config = OidcServiceConfig {
                state_expiry_secs: secs,
                ..OidcServiceConfig::with_secret(test_secret())
            };
            assert!(matches!(StateCodec::new(&config), Err(OidcError::ConfigError(_))));
        }
    }

    #[test]
    fn test_longest_expiry_round_trip() {
        let config = OidcServiceConfig {
            state_expiry_secs: crate::config::MAX_STATE_EXPIRY_SECS,
            ..OidcServiceConfig::with_secret(test_secret())
        };
        let codec = StateCodec::new(&config).unwrap();
        let token = codec.encode(&params()).unwrap();

        assert_eq!(codec.decode(&token).unwrap(), params());
    }

    #[test]
    fn test_expiry_overflow_is_an_error() {
        let result = codec().encode_at(&params(), DateTime::<Utc>::MAX_UTC);
        assert!(matches!(result, Err(OidcError::ConfigError(_))));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let debug = format!("{:?}", codec());
        assert!(!debug.contains(&test_secret()));
    }
}
