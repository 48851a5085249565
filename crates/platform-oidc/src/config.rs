//! Service configuration for OIDC login flows.
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for local development. Signing key material lives here only until
//! [`crate::state::StateCodec::new`] turns it into immutable keys at startup.

use crate::error::{OidcError, OidcResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum length accepted for HMAC state signing secrets.
pub const MIN_HMAC_SECRET_LEN: usize = 32;

/// Longest accepted state token validity window (one day).
pub const MAX_STATE_EXPIRY_SECS: u64 = 86_400;

/// Algorithms accepted for signing state tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateSigningAlgorithm {
    /// HMAC using SHA-256
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
    /// RSASSA-PKCS1-v1_5 using SHA-256
    RS256,
    /// RSASSA-PKCS1-v1_5 using SHA-512
    RS512,
    /// ECDSA using P-256 and SHA-256
    ES256,
}

impl StateSigningAlgorithm {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "HS256" => Some(Self::HS256),
            "HS384" => Some(Self::HS384),
            "HS512" => Some(Self::HS512),
            "RS256" => Some(Self::RS256),
            "RS512" => Some(Self::RS512),
            "ES256" => Some(Self::ES256),
            _ => None,
        }
    }

    /// Whether the algorithm signs with a shared secret.
    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }
}

impl From<StateSigningAlgorithm> for jsonwebtoken::Algorithm {
    fn from(alg: StateSigningAlgorithm) -> Self {
        match alg {
            StateSigningAlgorithm::HS256 => jsonwebtoken::Algorithm::HS256,
            StateSigningAlgorithm::HS384 => jsonwebtoken::Algorithm::HS384,
            StateSigningAlgorithm::HS512 => jsonwebtoken::Algorithm::HS512,
            StateSigningAlgorithm::RS256 => jsonwebtoken::Algorithm::RS256,
            StateSigningAlgorithm::RS512 => jsonwebtoken::Algorithm::RS512,
            StateSigningAlgorithm::ES256 => jsonwebtoken::Algorithm::ES256,
        }
    }
}

/// Configuration for the OIDC service.
#[derive(Clone, Serialize, Deserialize)]
pub struct OidcServiceConfig {
    /// Session service address as `host:port`.
    pub session_service_address: String,

    /// Validity window of state tokens in seconds.
    pub state_expiry_secs: u64,

    /// Timeout for every outbound call in seconds.
    pub outbound_timeout_secs: u64,

    /// Algorithm used to sign state tokens.
    pub state_signing_algorithm: StateSigningAlgorithm,

    /// Shared secret for HMAC algorithms.
    pub state_signing_secret: Option<String>,

    /// Private key (PEM) for RSA/EC algorithms.
    pub state_private_key: Option<String>,

    /// Public key (PEM) for RSA/EC algorithms.
    pub state_public_key: Option<String>,

    /// Issuer and audience label stamped into state tokens.
    pub state_token_issuer: String,
}

impl std::fmt::Debug for OidcServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcServiceConfig")
            .field("session_service_address", &self.session_service_address)
            .field("state_expiry_secs", &self.state_expiry_secs)
            .field("outbound_timeout_secs", &self.outbound_timeout_secs)
            .field("state_signing_algorithm", &self.state_signing_algorithm)
            .field("state_signing_secret", &"[REDACTED]")
            .field("state_private_key", &"[REDACTED]")
            .field("state_token_issuer", &self.state_token_issuer)
            .finish()
    }
}

impl Default for OidcServiceConfig {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        Self {
            session_service_address: "localhost:9876".to_string(),
            state_expiry_secs: 300,
            outbound_timeout_secs: 10,
            state_signing_algorithm: StateSigningAlgorithm::HS256,
            state_signing_secret: None,
            state_private_key: None,
            state_public_key: None,
            state_token_issuer: "relay-platform-oidc".to_string(),
        }
    }
}

impl OidcServiceConfig {
    /// Create a configuration signing state tokens with an HMAC secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            state_signing_secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `OIDC_SESSION_SERVICE_ADDRESS`: session service `host:port` (default: localhost:9876)
    /// - `OIDC_STATE_EXPIRY_SECS`: state token validity in seconds (default: 300)
    /// - `OIDC_OUTBOUND_TIMEOUT_SECS`: outbound request timeout (default: 10)
    /// - `OIDC_STATE_SIGNING_ALG`: state signing algorithm (default: HS256)
    /// - `OIDC_STATE_SIGNING_SECRET`: HMAC secret
    /// - `OIDC_STATE_PRIVATE_KEY`: PEM private key for RSA/EC
    /// - `OIDC_STATE_PUBLIC_KEY`: PEM public key for RSA/EC
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            session_service_address: std::env::var("OIDC_SESSION_SERVICE_ADDRESS")
                .unwrap_or(default.session_service_address),
            state_expiry_secs: std::env::var("OIDC_STATE_EXPIRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.state_expiry_secs),
            outbound_timeout_secs: std::env::var("OIDC_OUTBOUND_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.outbound_timeout_secs),
            state_signing_algorithm: std::env::var("OIDC_STATE_SIGNING_ALG")
                .ok()
                .and_then(|s| StateSigningAlgorithm::parse(&s))
                .unwrap_or(default.state_signing_algorithm),
            state_signing_secret: std::env::var("OIDC_STATE_SIGNING_SECRET").ok(),
            state_private_key: std::env::var("OIDC_STATE_PRIVATE_KEY").ok(),
            state_public_key: std::env::var("OIDC_STATE_PUBLIC_KEY").ok(),
            state_token_issuer: default.state_token_issuer,
        }
    }

    /// Validate that signing material matches the chosen algorithm.
    pub fn validate(&self) -> OidcResult<()> {
        if self.session_service_address.trim().is_empty() {
            return Err(OidcError::ConfigError(
                "Session service address is empty".to_string(),
            ));
        }
        if self.state_expiry_secs == 0 {
            return Err(OidcError::ConfigError(
                "State expiry must be positive".to_string(),
            ));
        }
        if self.state_expiry_secs > MAX_STATE_EXPIRY_SECS {
            return Err(OidcError::ConfigError(format!(
                "State expiry must not exceed {} seconds",
                MAX_STATE_EXPIRY_SECS
            )));
        }

        if self.state_signing_algorithm.is_hmac() {
            match &self.state_signing_secret {
                Some(secret) if secret.len() >= MIN_HMAC_SECRET_LEN => Ok(()),
                Some(_) => Err(OidcError::ConfigError(format!(
                    "State signing secret must be at least {} bytes",
                    MIN_HMAC_SECRET_LEN
                ))),
                None => Err(OidcError::ConfigError(
                    "Secret required for HMAC".to_string(),
                )),
            }
        } else if self.state_private_key.is_none() || self.state_public_key.is_none() {
            Err(OidcError::ConfigError(
                "Private and public key required for asymmetric state signing".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// State token validity window.
    pub fn state_expiry(&self) -> OidcResult<chrono::Duration> {
        i64::try_from(self.state_expiry_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| OidcError::ConfigError("State expiry out of range".to_string()))
    }

    /// Outbound request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_secs)
    }

    /// Full URL of the session creation endpoint.
    pub fn session_endpoint(&self) -> String {
        let address = self
            .session_service_address
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("http://{}/session", address)
    }

    /// Build the shared HTTP client for all outbound calls.
    ///
    /// Redirects are not followed: discovery, JWKS, token and session
    /// endpoints are all expected to answer directly.
    pub fn http_client(&self) -> OidcResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OidcError::ConfigError(format!("Failed to build HTTP client: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secret() -> String {
        "test-secret-key-for-state-signing-minimum-32-chars".to_string()
    }

    #[test]
    fn test_default_config() {
        let config = OidcServiceConfig::default();
        assert_eq!(config.state_expiry_secs, 300);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.state_signing_algorithm, StateSigningAlgorithm::HS256);
    }

    #[test]
    fn test_session_endpoint() {
        let mut config = OidcServiceConfig::default();
        assert_eq!(config.session_endpoint(), "http://localhost:9876/session");

        config.session_service_address = "http://server:9876/".to_string();
        assert_eq!(config.session_endpoint(), "http://server:9876/session");
    }

    #[test]
    fn test_validate_requires_secret() {
        let config = OidcServiceConfig::default();
        assert!(matches!(config.validate(), Err(OidcError::ConfigError(_))));

        let short = OidcServiceConfig::with_secret("short");
        assert!(matches!(short.validate(), Err(OidcError::ConfigError(_))));

        let config = OidcServiceConfig::with_secret(test_secret());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_key_pair() {
        let config = OidcServiceConfig {
            state_signing_algorithm: StateSigningAlgorithm::RS256,
            state_private_key: Some("pem".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OidcError::ConfigError(_))));
    }

    #[test]
    fn test_validate_bounds_state_expiry() {
        let mut config = OidcServiceConfig::with_secret(test_secret());

        config.state_expiry_secs = MAX_STATE_EXPIRY_SECS;
        assert!(config.validate().is_ok());
        assert_eq!(config.state_expiry().unwrap(), chrono::Duration::days(1));

        for secs in [0, MAX_STATE_EXPIRY_SECS + 1, 10_000_000_000_000, u64::MAX] {
            config.state_expiry_secs = secs;
            assert!(matches!(config.validate(), Err(OidcError::ConfigError(_))));
        }
    }

    #[test]
    fn test_state_expiry_out_of_range() {
        let config = OidcServiceConfig {
            state_expiry_secs: u64::MAX,
            ..OidcServiceConfig::with_secret(test_secret())
        };
        assert!(matches!(config.state_expiry(), Err(OidcError::ConfigError(_))));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(StateSigningAlgorithm::parse("hs256"), Some(StateSigningAlgorithm::HS256));
        assert_eq!(StateSigningAlgorithm::parse("ES256"), Some(StateSigningAlgorithm::ES256));
        assert_eq!(StateSigningAlgorithm::parse("none"), None);
        assert!(!StateSigningAlgorithm::RS256.is_hmac());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = OidcServiceConfig::with_secret(test_secret());
        let debug = format!("{:?}", config);
        assert!(!debug.contains(&test_secret()));
        assert!(debug.contains("[REDACTED]"));
    }
}
