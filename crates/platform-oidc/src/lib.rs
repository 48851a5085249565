//! # Platform OIDC
//!
//! Multi-tenant OpenID Connect login for the Relay platform. Each
//! organization registers its own identity provider; this crate runs the
//! authorization code flow against it and hands the verified identity to
//! the session service.
//!
//! ## Overview
//!
//! - **State tokens**: the redirect `state` is a short-lived JWT signed with
//!   the service key, so no per-flow data lives on the server
//! - **Client configs**: per-organization settings are loaded from a
//!   [`ClientConfigStore`], decrypted with a [`SecretCipher`] and the issuer
//!   is rediscovered on every request
//! - **Verification**: ID tokens are checked against the provider's JWKS,
//!   then the nonce is compared with the one issued at start
//! - **Sessions**: the verified identity is posted to the session service,
//!   which must answer with exactly one cookie
//!
//! ## Features
//!
//! - `memory` (default): in-memory client config store
//!
//! ## Usage
//!
//! ```rust,no_run
//! use platform_oidc::{
//!     CallbackParams, InMemoryClientConfigStore, OidcService, OidcServiceConfig, StartSelector,
//!     StateParams,
//! };
//! # use platform_oidc::{CipherError, SecretCipher};
//! # struct Kms;
//! # impl SecretCipher for Kms {
//! #     fn decrypt(&self, c: &[u8]) -> Result<Vec<u8>, CipherError> { Ok(c.to_vec()) }
//! # }
//! use std::sync::Arc;
//!
//! # async fn run() -> platform_oidc::OidcResult<()> {
//! let service = OidcService::new(
//!     &OidcServiceConfig::from_env(),
//!     Arc::new(InMemoryClientConfigStore::new()),
//!     Arc::new(Kms),
//! )?;
//! let redirect = "https://app.example.com/iam/oidc/callback";
//!
//! // Start: redirect the browser and keep the nonce in a cookie
//! let selector = StartSelector::from_query([("orgSlug", "acme-corp")])?;
//! let config = service.client_config_from_start(&selector).await?;
//! let start = service.start_params(&config, redirect, &StateParams::new(config.id.to_string()))?;
//!
//! // Callback: verify and create the session
//! let callback = CallbackParams::from_query([("state", start.state.as_str()), ("code", "abc")])?;
//! let (cookie, _state) = service.complete_login(&callback, redirect, &start.nonce).await?;
//! # let _ = cookie;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every failure ends the flow. Log the [`OidcError`] and answer the browser
//! with [`OidcError::public_message`].

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod service;
pub mod session;
pub mod state;
pub mod store;
pub mod verify;

// Re-export main types
pub use client::{ClientConfig, ClientConfigResolver, StartSelector, OPENID_SCOPE};
pub use config::{OidcServiceConfig, StateSigningAlgorithm};
pub use discovery::{DiscoveryError, ProviderMetadata};
pub use error::{OidcError, OidcResult, AUTHENTICATION_FAILED};
pub use flow::{generate_nonce, StartParams};
pub use service::{require_nonce, OidcService};
pub use session::{SessionCookie, SessionIssuer};
pub use state::{StateCodec, StateParams};
pub use store::{
    CipherError, ClientConfigStore, ClientSpec, PersistedClientConfig, SecretCipher, StoreError,
    StoreResult,
};
pub use verify::{AuthFlowResult, AuthenticateParams, CallbackParams, IdToken, OAuth2Result};

#[cfg(feature = "memory")]
pub use store::InMemoryClientConfigStore;
