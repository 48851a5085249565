//! Error types for OIDC login flows
//!
//! This module defines every failure that can terminate a login flow:
//! state token problems, client configuration resolution, ID token
//! verification and session creation.
//!
//! Display strings are safe to log but are still not meant for end users.
//! Handlers should answer with [`OidcError::public_message`], which never
//! reveals which step failed.

use thiserror::Error;

/// Generic text returned to the browser for every failed flow.
pub const AUTHENTICATION_FAILED: &str = "Authentication failed";

/// OIDC flow error types.
///
/// All variants are terminal for the flow that produced them. Nothing in
/// this crate retries; the caller may start a fresh flow with a new state
/// and nonce.
#[derive(Debug, Error)]
pub enum OidcError {
    /// State token is missing, malformed, forged or expired
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Inbound request is missing a parameter or carries conflicting ones
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No client configuration for the given slug or id
    #[error("OIDC client config not found")]
    NotFound,

    /// Stored client secret material could not be decrypted
    #[error("Failed to decrypt OIDC client config")]
    DecryptionFailed,

    /// Provider discovery failed for the configured issuer
    #[error("OIDC provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Authorization code exchange with the provider failed
    #[error("Token exchange failed")]
    TokenExchangeFailed,

    /// Token response carried no `id_token`
    #[error("id_token not found in token response")]
    MissingIdToken,

    /// Signature, issuer, audience or expiry check failed
    #[error("Failed to verify id_token: {0}")]
    TokenVerificationFailed(String),

    /// Verified payload could not be decoded into claims
    #[error("Failed to decode id_token claims: {0}")]
    ClaimsDecodeFailed(String),

    /// Nonce claim does not match the nonce issued at flow start
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// Session service answered 200 without exactly one cookie
    #[error("Unexpected count of session cookies: {0}")]
    UnexpectedCookieCount(usize),

    /// Session service answered with a non-200 status
    #[error("Failed to create session: unexpected status code {status}")]
    SessionCreationFailed {
        /// HTTP status returned by the session service (0 if unreachable)
        status: u16,
    },

    /// Configuration store backend failure
    #[error("Client config store error: {0}")]
    StoreError(String),

    /// Service misconfiguration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for OIDC flow operations.
pub type OidcResult<T> = Result<T, OidcError>;

impl OidcError {
    /// Check if this error should be logged at error level.
    ///
    /// Rejected state tokens and nonce mismatches are expected under
    /// attack or with stale browser tabs and are logged as warnings.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            OidcError::DecryptionFailed
                | OidcError::ProviderUnavailable(_)
                | OidcError::TokenExchangeFailed
                | OidcError::SessionCreationFailed { .. }
                | OidcError::UnexpectedCookieCount(_)
                | OidcError::StoreError(_)
                | OidcError::ConfigError(_)
        )
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            OidcError::InvalidRequest(_) => 400,
            OidcError::NotFound => 404,

            OidcError::InvalidState(_)
            | OidcError::MissingIdToken
            | OidcError::TokenVerificationFailed(_)
            | OidcError::ClaimsDecodeFailed(_)
            | OidcError::NonceMismatch => 401,

            OidcError::ProviderUnavailable(_) | OidcError::TokenExchangeFailed => 502,

            OidcError::DecryptionFailed
            | OidcError::UnexpectedCookieCount(_)
            | OidcError::SessionCreationFailed { .. }
            | OidcError::StoreError(_)
            | OidcError::ConfigError(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            OidcError::InvalidState(_) => "INVALID_STATE",
            OidcError::InvalidRequest(_) => "INVALID_REQUEST",
            OidcError::NotFound => "NOT_FOUND",
            OidcError::DecryptionFailed => "DECRYPTION_FAILED",
            OidcError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            OidcError::TokenExchangeFailed => "TOKEN_EXCHANGE_FAILED",
            OidcError::MissingIdToken => "MISSING_ID_TOKEN",
            OidcError::TokenVerificationFailed(_) => "TOKEN_VERIFICATION_FAILED",
            OidcError::ClaimsDecodeFailed(_) => "CLAIMS_DECODE_FAILED",
            OidcError::NonceMismatch => "NONCE_MISMATCH",
            OidcError::UnexpectedCookieCount(_) => "UNEXPECTED_COOKIE_COUNT",
            OidcError::SessionCreationFailed { .. } => "SESSION_CREATION_FAILED",
            OidcError::StoreError(_) => "STORE_ERROR",
            OidcError::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Message safe to show to the end user.
    ///
    /// Malformed requests get their own text so integrators can fix links;
    /// every flow failure collapses to [`AUTHENTICATION_FAILED`].
    pub fn public_message(&self) -> &'static str {
        match self {
            OidcError::InvalidRequest(_) => "Invalid login request",
            OidcError::NotFound => "Login configuration not found",
            _ => AUTHENTICATION_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_failures_share_public_message() {
        let errors = [
            OidcError::InvalidState("expired".to_string()),
            OidcError::DecryptionFailed,
            OidcError::NonceMismatch,
            OidcError::TokenVerificationFailed("bad signature".to_string()),
            OidcError::SessionCreationFailed { status: 500 },
        ];

        for error in errors {
            assert_eq!(error.public_message(), AUTHENTICATION_FAILED);
        }
    }

    #[test]
    fn test_decryption_failure_does_not_leak_cause() {
        let message = OidcError::DecryptionFailed.to_string();
        assert_eq!(message, "Failed to decrypt OIDC client config");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(OidcError::NotFound.status_code(), 404);
        assert_eq!(OidcError::NonceMismatch.status_code(), 401);
        assert_eq!(OidcError::ProviderUnavailable("down".into()).status_code(), 502);
        assert_eq!(OidcError::UnexpectedCookieCount(2).status_code(), 500);
        assert!(OidcError::DecryptionFailed.is_server_error());
        assert!(!OidcError::NonceMismatch.is_server_error());
    }
}
