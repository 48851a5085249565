//! OIDC login flow service
//!
//! Ties the state codec, client configuration resolver, verifier and
//! session bridge together behind one handle that HTTP handlers can share.
//!
//! A complete login looks like this:
//!
//! 1. `client_config_from_start` + `start_params` on the start request
//! 2. `client_config_from_callback` + `exchange_code` + `authenticate` on callback
//! 3. `create_session` and, on first success, `activate_client_config`

use crate::client::{ClientConfig, ClientConfigResolver, StartSelector};
use crate::config::OidcServiceConfig;
use crate::error::{OidcError, OidcResult};
use crate::flow::{self, StartParams};
use crate::session::{SessionCookie, SessionIssuer};
use crate::state::{StateCodec, StateParams};
use crate::store::{ClientConfigStore, SecretCipher};
use crate::verify::{self, AuthFlowResult, AuthenticateParams, CallbackParams, OAuth2Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// OIDC login flow service.
///
/// Cheap to clone. Holds no per-flow state: everything a flow needs travels
/// in the signed state token and the nonce the caller keeps.
#[derive(Debug, Clone)]
pub struct OidcService {
    codec: Arc<StateCodec>,
    resolver: ClientConfigResolver,
    sessions: SessionIssuer,
    http: reqwest::Client,
}

impl OidcService {
    /// Create a new service.
    ///
    /// Fails with `ConfigError` if the configuration is invalid.
    pub fn new(
        config: &OidcServiceConfig,
        store: Arc<dyn ClientConfigStore>,
        cipher: Arc<dyn SecretCipher>,
    ) -> OidcResult<Self> {
        let codec = StateCodec::new(config)?;
        let http = config.http_client()?;

        Ok(Self {
            codec: Arc::new(codec),
            resolver: ClientConfigResolver::new(store, cipher, http.clone()),
            sessions: SessionIssuer::new(http.clone(), config.session_endpoint()),
            http,
        })
    }

    /// State codec used by this service.
    pub fn state_codec(&self) -> &StateCodec {
        &self.codec
    }

    /// Resolve the client configuration selected by a start request.
    pub async fn client_config_from_start(
        &self,
        selector: &StartSelector,
    ) -> OidcResult<ClientConfig> {
        self.resolver.resolve(selector).await
    }

    /// Resolve the client configuration a callback belongs to.
    ///
    /// The state token is verified first; the configuration ID is only read
    /// from a genuine, unexpired token.
    #[instrument(skip(self, callback))]
    pub async fn client_config_from_callback(
        &self,
        callback: &CallbackParams,
    ) -> OidcResult<(ClientConfig, StateParams)> {
        let state = self.codec.decode(&callback.state)?;

        let config = self
            .resolver
            .by_id(&state.client_config_id)
            .await
            .map_err(|e| {
                warn!(config_id = %state.client_config_id, error = %e, "Callback state names unusable client config");
                e
            })?;

        Ok((config, state))
    }

    /// Build the authorization redirect for a login attempt.
    pub fn start_params(
        &self,
        config: &ClientConfig,
        redirect_url: &str,
        state_params: &StateParams,
    ) -> OidcResult<StartParams> {
        flow::start_params(&self.codec, config, redirect_url, state_params)
    }

    /// Exchange the callback's authorization code for tokens.
    pub async fn exchange_code(
        &self,
        config: &ClientConfig,
        callback: &CallbackParams,
        redirect_url: &str,
    ) -> OidcResult<OAuth2Result> {
        verify::exchange_code(&self.http, config, &callback.code, redirect_url).await
    }

    /// Verify the ID token of a completed exchange.
    pub async fn authenticate(&self, params: AuthenticateParams<'_>) -> OidcResult<AuthFlowResult> {
        verify::authenticate(&self.http, params).await
    }

    /// Create a session for a verified identity.
    pub async fn create_session(
        &self,
        flow_result: &AuthFlowResult,
        organization_id: Uuid,
    ) -> OidcResult<SessionCookie> {
        self.sessions.create_session(flow_result, organization_id).await
    }

    /// Mark a client configuration as active after a successful login.
    #[instrument(skip(self, config), fields(config_id = %config.id))]
    pub async fn activate_client_config(&self, config: &ClientConfig) -> OidcResult<()> {
        self.resolver.activate(config).await?;
        info!("Activated OIDC client config");
        Ok(())
    }

    /// Run the whole callback leg: resolve, exchange, verify, create session.
    ///
    /// A config that was not active yet is activated once the session
    /// exists.
    ///
    /// Returns the session cookie and the decoded state so the caller can
    /// honour `return_to_url`.
    pub async fn complete_login(
        &self,
        callback: &CallbackParams,
        redirect_url: &str,
        nonce_cookie_value: &str,
    ) -> OidcResult<(SessionCookie, StateParams)> {
        let (config, state) = self.client_config_from_callback(callback).await?;
        let oauth2_result = self.exchange_code(&config, callback, redirect_url).await?;

        let flow_result = self
            .authenticate(AuthenticateParams {
                config: &config,
                oauth2_result: &oauth2_result,
                nonce_cookie_value,
            })
            .await?;

        let cookie = self
            .create_session(&flow_result, config.organization_id)
            .await?;

        // A failed activation does not undo an issued session.
        if !config.active {
            if let Err(e) = self.activate_client_config(&config).await {
                warn!(config_id = %config.id, error = %e, "Failed to activate client config");
            }
        }

        Ok((cookie, state))
    }
}

/// Reject a login whose nonce cookie is gone before any network call.
pub fn require_nonce(nonce_cookie_value: Option<&str>) -> OidcResult<&str> {
    match nonce_cookie_value {
        Some(nonce) if !nonce.is_empty() => Ok(nonce),
        _ => Err(OidcError::NonceMismatch),
    }
}
