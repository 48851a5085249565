//! Login flow initiation
//!
//! Builds the provider authorization URL together with the signed state and
//! a fresh nonce. The caller keeps the nonce (typically in a short-lived
//! cookie) and hands it back on callback.

use crate::client::ClientConfig;
use crate::error::OidcResult;
use crate::state::{StateCodec, StateParams};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use oauth2::{CsrfToken, Scope};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Random bytes in every nonce.
pub const NONCE_BYTES: usize = 32;

/// Everything needed to redirect the browser to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    /// Signed state token, also embedded in `auth_code_url`
    pub state: String,

    /// Nonce the ID token must echo back
    pub nonce: String,

    /// Provider authorization URL
    pub auth_code_url: String,
}

/// Generate a URL-safe nonce from 32 bytes of OS-seeded randomness.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Produce the authorization URL, state and nonce for one login attempt.
///
/// The redirect URL is bound per request so each tenant can be called back
/// on its own route. No network call happens here.
pub fn start_params(
    codec: &StateCodec,
    config: &ClientConfig,
    redirect_url: &str,
    state_params: &StateParams,
) -> OidcResult<StartParams> {
    let state = codec.encode(state_params)?;
    let nonce = generate_nonce();

    let client = config.oauth2_client(redirect_url)?;
    let (auth_code_url, _) = client
        .authorize_url(|| CsrfToken::new(state.clone()))
        .add_scopes(config.oauth2.scopes.iter().cloned().map(Scope::new))
        .add_extra_param("nonce", nonce.clone())
        .url();

    debug!(config_id = %config.id, "Prepared OIDC authorization request");

    Ok(StartParams {
        state,
        nonce,
        auth_code_url: auth_code_url.to_string(),
    })
}
