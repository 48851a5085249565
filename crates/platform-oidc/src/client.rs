//! Per-organization OIDC client configuration
//!
//! A [`ClientConfig`] is rebuilt on every request: the persisted record is
//! loaded, its secret part decrypted and the issuer rediscovered. Neither the
//! decrypted secret nor the discovered endpoints outlive the request.

use crate::discovery::{self, ProviderMetadata};
use crate::error::{OidcError, OidcResult};
use crate::store::{ClientConfigStore, ClientSpec, PersistedClientConfig, SecretCipher, StoreError};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, ExtraTokenFields, RedirectUrl, StandardRevocableToken,
    StandardTokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Scope every OIDC authorization request must carry.
pub const OPENID_SCOPE: &str = "openid";

/// Extra token response fields returned by OIDC providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    /// Raw ID token (compact JWS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

/// Token endpoint response including the ID token.
pub type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

/// OAuth2 client bound to one provider and one redirect URL.
pub type OAuth2Client = oauth2::Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// How a start request selects the client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartSelector {
    /// Configuration registered for an organization slug
    BySlug(String),
    /// Configuration by ID
    ById(String),
}

impl StartSelector {
    /// Build the selector from start request query parameters.
    ///
    /// Exactly one of `orgSlug` and `id` must be present and non-empty.
    pub fn from_query<I, K, V>(pairs: I) -> OidcResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut slug = None;
        let mut id = None;

        for (key, value) in pairs {
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "orgSlug" => slug = Some(value.to_string()),
                "id" => id = Some(value.to_string()),
                _ => {}
            }
        }

        match (slug, id) {
            (Some(slug), None) => Ok(StartSelector::BySlug(slug)),
            (None, Some(id)) => Ok(StartSelector::ById(id)),
            (Some(_), Some(_)) => Err(OidcError::InvalidRequest(
                "orgSlug and id are mutually exclusive".to_string(),
            )),
            (None, None) => Err(OidcError::InvalidRequest(
                "missing orgSlug or id parameter".to_string(),
            )),
        }
    }
}

/// Endpoints discovered from the provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    /// Authorization endpoint
    pub authorization_endpoint: String,

    /// Token endpoint
    pub token_endpoint: String,

    /// JSON Web Key Set location
    pub jwks_uri: String,
}

impl From<ProviderMetadata> for ProviderEndpoints {
    fn from(metadata: ProviderMetadata) -> Self {
        Self {
            authorization_endpoint: metadata.authorization_endpoint,
            token_endpoint: metadata.token_endpoint,
            jwks_uri: metadata.jwks_uri,
        }
    }
}

/// OAuth2 client parameters.
#[derive(Debug, Clone)]
pub struct OAuth2Params {
    /// Client ID
    pub client_id: String,

    /// Client secret (redacted in Debug output)
    pub client_secret: ClientSecret,

    /// Scopes to request, always including `openid`
    pub scopes: Vec<String>,

    /// Provider endpoints
    pub endpoints: ProviderEndpoints,
}

/// ID token verifier parameters.
#[derive(Debug, Clone)]
pub struct VerifierParams {
    /// Expected audience
    pub client_id: String,
}

/// Resolved OIDC client configuration for one organization.
///
/// Request-scoped: do not cache.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Configuration ID
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Issuer URL
    pub issuer: String,

    /// Whether a login through this config has already succeeded
    pub active: bool,

    /// OAuth2 client parameters
    pub oauth2: OAuth2Params,

    /// ID token verifier parameters
    pub verifier: VerifierParams,
}

impl ClientConfig {
    /// Build an OAuth2 client bound to a redirect URL.
    pub fn oauth2_client(&self, redirect_url: &str) -> OidcResult<OAuth2Client> {
        let auth_url = AuthUrl::new(self.oauth2.endpoints.authorization_endpoint.clone())
            .map_err(|e| OidcError::ProviderUnavailable(format!("Invalid authorization endpoint: {}", e)))?;
        let token_url = TokenUrl::new(self.oauth2.endpoints.token_endpoint.clone())
            .map_err(|e| OidcError::ProviderUnavailable(format!("Invalid token endpoint: {}", e)))?;
        let redirect_url = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| OidcError::InvalidRequest(format!("Invalid redirect URL: {}", e)))?;

        Ok(OAuth2Client::new(
            ClientId::new(self.oauth2.client_id.clone()),
            Some(self.oauth2.client_secret.clone()),
            auth_url,
            Some(token_url),
        )
        .set_redirect_uri(redirect_url))
    }
}

fn with_openid_scope(mut scopes: Vec<String>) -> Vec<String> {
    if !scopes.iter().any(|s| s == OPENID_SCOPE) {
        scopes.insert(0, OPENID_SCOPE.to_string());
    }
    scopes
}

/// Loads persisted client configurations and turns them into [`ClientConfig`]s.
#[derive(Clone)]
pub struct ClientConfigResolver {
    store: Arc<dyn ClientConfigStore>,
    cipher: Arc<dyn SecretCipher>,
    http: reqwest::Client,
}

impl std::fmt::Debug for ClientConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfigResolver").finish()
    }
}

impl ClientConfigResolver {
    /// Create a resolver.
    pub fn new(
        store: Arc<dyn ClientConfigStore>,
        cipher: Arc<dyn SecretCipher>,
        http: reqwest::Client,
    ) -> Self {
        Self { store, cipher, http }
    }

    /// Resolve the configuration a start request points at.
    pub async fn resolve(&self, selector: &StartSelector) -> OidcResult<ClientConfig> {
        match selector {
            StartSelector::BySlug(slug) => self.by_org_slug(slug).await,
            StartSelector::ById(id) => self.by_id(id).await,
        }
    }

    /// Resolve the configuration registered for an organization slug.
    #[instrument(skip(self))]
    pub async fn by_org_slug(&self, slug: &str) -> OidcResult<ClientConfig> {
        let record = self
            .store
            .get_by_org_slug(slug)
            .await
            .map_err(store_error)?;
        self.convert(record).await
    }

    /// Resolve a configuration by ID.
    ///
    /// IDs that are not valid UUIDs are reported as `NotFound`.
    #[instrument(skip(self))]
    pub async fn by_id(&self, id: &str) -> OidcResult<ClientConfig> {
        let id = Uuid::parse_str(id).map_err(|_| OidcError::NotFound)?;
        let record = self.store.get_by_id(id).await.map_err(store_error)?;
        self.convert(record).await
    }

    /// Mark a configuration as active after a successful login.
    pub async fn activate(&self, config: &ClientConfig) -> OidcResult<()> {
        self.store.activate(config.id).await.map_err(store_error)
    }

    async fn convert(&self, record: PersistedClientConfig) -> OidcResult<ClientConfig> {
        let spec = self.decrypt_spec(&record)?;

        let metadata = discovery::discover(&self.http, &record.issuer)
            .await
            .map_err(|e| {
                error!(config_id = %record.id, error = %e, "OIDC provider discovery failed");
                OidcError::ProviderUnavailable(e.to_string())
            })?;
        debug!(config_id = %record.id, issuer = %record.issuer, "Resolved OIDC client config");

        Ok(ClientConfig {
            id: record.id,
            organization_id: record.organization_id,
            issuer: record.issuer,
            active: record.active,
            oauth2: OAuth2Params {
                client_id: spec.client_id.clone(),
                client_secret: ClientSecret::new(spec.client_secret),
                scopes: with_openid_scope(spec.scopes),
                endpoints: metadata.into(),
            },
            verifier: VerifierParams {
                client_id: spec.client_id,
            },
        })
    }

    fn decrypt_spec(&self, record: &PersistedClientConfig) -> OidcResult<ClientSpec> {
        let plaintext = self.cipher.decrypt(&record.encrypted_spec).map_err(|e| {
            error!(config_id = %record.id, error = %e, "Failed to decrypt oidc client config");
            OidcError::DecryptionFailed
        })?;

        serde_json::from_slice(&plaintext).map_err(|e| {
            error!(config_id = %record.id, error = %e, "Decrypted oidc client config is not valid");
            OidcError::DecryptionFailed
        })
    }
}

fn store_error(e: StoreError) -> OidcError {
    match e {
        StoreError::NotFound => OidcError::NotFound,
        StoreError::Backend(message) => {
            error!(error = %message, "Client config store failure");
            OidcError::StoreError(message)
        }
    }
}
