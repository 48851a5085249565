//! OIDC provider discovery and JWKS retrieval.
//!
//! Nothing here is cached: every call goes to the provider. Results are
//! request-scoped and dropped with the [`crate::client::ClientConfig`] that
//! holds them.

use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

/// Path of the discovery document relative to the issuer.
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Discovery errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("Provider returned status {0}")]
    UnexpectedStatus(u16),

    /// Document could not be parsed.
    #[error("Invalid provider document: {0}")]
    InvalidDocument(String),

    /// Discovery document names a different issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer.
        expected: String,
        /// Issuer in the discovery document.
        actual: String,
    },
}

/// Provider metadata from the discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,

    /// Authorization endpoint
    pub authorization_endpoint: String,

    /// Token endpoint
    pub token_endpoint: String,

    /// JSON Web Key Set location
    pub jwks_uri: String,

    /// Userinfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// Supported response types
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// ID token signing algorithms supported
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Supported scopes
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Discovery URL for an issuer.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), WELL_KNOWN_PATH)
}

/// Fetch and validate the discovery document for an issuer.
#[instrument(skip(http))]
pub async fn discover(http: &reqwest::Client, issuer: &str) -> Result<ProviderMetadata, DiscoveryError> {
    let url = discovery_url(issuer);
    debug!("Fetching provider metadata from {}", url);

    let response = http.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        error!(status = status.as_u16(), "Provider discovery failed");
        return Err(DiscoveryError::UnexpectedStatus(status.as_u16()));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| DiscoveryError::InvalidDocument(e.to_string()))?;

    // Exact match, trailing slash included.
    if metadata.issuer != issuer {
        error!(expected = issuer, actual = %metadata.issuer, "Discovery issuer mismatch");
        return Err(DiscoveryError::IssuerMismatch {
            expected: issuer.to_string(),
            actual: metadata.issuer,
        });
    }

    Ok(metadata)
}

/// Fetch the provider's signing keys.
#[instrument(skip(http))]
pub async fn fetch_jwks(http: &reqwest::Client, jwks_uri: &str) -> Result<JwkSet, DiscoveryError> {
    let response = http.get(jwks_uri).send().await?;
    let status = response.status();
    if !status.is_success() {
        error!(status = status.as_u16(), "JWKS fetch failed");
        return Err(DiscoveryError::UnexpectedStatus(status.as_u16()));
    }

    response
        .json()
        .await
        .map_err(|e| DiscoveryError::InvalidDocument(format!("Failed to parse JWKS: {}", e)))
}
