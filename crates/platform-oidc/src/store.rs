//! Client configuration storage and secret decryption
//!
//! Per-organization OIDC client configurations are persisted elsewhere with
//! their secret part encrypted. This module defines the seams this crate
//! consumes: a lookup store and an opaque cipher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "memory")]
use std::{collections::HashMap, sync::Arc};
#[cfg(feature = "memory")]
use tokio::sync::RwLock;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for the given key
    #[error("Client config not found")]
    NotFound,

    /// Backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Cipher error types.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Ciphertext could not be decrypted
    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// Persisted client configuration as returned by the store.
///
/// `encrypted_spec` holds the encrypted JSON form of [`ClientSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedClientConfig {
    /// Configuration ID
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Slug of the owning organization
    pub organization_slug: String,

    /// Issuer URL of the identity provider
    pub issuer: String,

    /// Encrypted [`ClientSpec`] JSON
    pub encrypted_spec: Vec<u8>,

    /// Whether a login through this config has succeeded
    #[serde(default)]
    pub active: bool,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl PersistedClientConfig {
    /// Create a new inactive record.
    pub fn new(
        organization_id: Uuid,
        organization_slug: impl Into<String>,
        issuer: impl Into<String>,
        encrypted_spec: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            organization_id,
            organization_slug: organization_slug.into(),
            issuer: issuer.into(),
            encrypted_spec,
            active: false,
            created_at: Utc::now(),
        }
    }
}

/// Decrypted secret part of a client configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    /// OAuth2 client ID
    pub client_id: String,

    /// OAuth2 client secret
    pub client_secret: String,

    /// Scopes to request
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for ClientSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSpec")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Lookup of persisted client configurations.
#[async_trait]
pub trait ClientConfigStore: Send + Sync {
    /// Find the configuration registered for an organization slug.
    async fn get_by_org_slug(&self, slug: &str) -> StoreResult<PersistedClientConfig>;

    /// Find a configuration by ID.
    async fn get_by_id(&self, id: Uuid) -> StoreResult<PersistedClientConfig>;

    /// Mark a configuration as active.
    async fn activate(&self, id: Uuid) -> StoreResult<()>;
}

/// Opaque cipher for stored secret material.
pub trait SecretCipher: Send + Sync {
    /// Decrypt a ciphertext into plaintext bytes.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// In-memory client config store.
///
/// Suitable for development setups and tests.
#[cfg(feature = "memory")]
#[derive(Clone, Default)]
pub struct InMemoryClientConfigStore {
    configs: Arc<RwLock<HashMap<Uuid, PersistedClientConfig>>>,
}

#[cfg(feature = "memory")]
impl std::fmt::Debug for InMemoryClientConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryClientConfigStore").finish()
    }
}

#[cfg(feature = "memory")]
impl InMemoryClientConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a configuration.
    pub async fn insert(&self, config: PersistedClientConfig) {
        self.configs.write().await.insert(config.id, config);
    }
}

#[cfg(feature = "memory")]
#[async_trait]
impl ClientConfigStore for InMemoryClientConfigStore {
    async fn get_by_org_slug(&self, slug: &str) -> StoreResult<PersistedClientConfig> {
        let configs = self.configs.read().await;

        // Prefer an active config, then the most recent one.
        configs
            .values()
            .filter(|c| c.organization_slug == slug)
            .max_by_key(|c| (c.active, c.created_at))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<PersistedClientConfig> {
        self.configs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn activate(&self, id: Uuid) -> StoreResult<()> {
        let mut configs = self.configs.write().await;
        let config = configs.get_mut(&id).ok_or(StoreError::NotFound)?;
        config.active = true;
        Ok(())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;

    fn record(org_id: Uuid, slug: &str) -> PersistedClientConfig {
        PersistedClientConfig::new(org_id, slug, "https://idp.example.com", b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_slug() {
        let store = InMemoryClientConfigStore::new();
        let config = record(Uuid::now_v7(), "acme-corp");
        store.insert(config.clone()).await;

        assert_eq!(store.get_by_id(config.id).await.unwrap().id, config.id);
        assert_eq!(store.get_by_org_slug("acme-corp").await.unwrap().id, config.id);
        assert!(matches!(store.get_by_org_slug("other").await, Err(StoreError::NotFound)));
        assert!(matches!(store.get_by_id(Uuid::now_v7()).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_slug_lookup_prefers_active_config() {
        let store = InMemoryClientConfigStore::new();
        let org_id = Uuid::now_v7();
        let first = record(org_id, "acme-corp");
        let second = record(org_id, "acme-corp");
        store.insert(first.clone()).await;
        store.insert(second.clone()).await;

        store.activate(first.id).await.unwrap();

        assert_eq!(store.get_by_org_slug("acme-corp").await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_activate_unknown_config() {
        let store = InMemoryClientConfigStore::new();
        assert!(matches!(store.activate(Uuid::now_v7()).await, Err(StoreError::NotFound)));
    }

    #[test]
    fn test_client_spec_debug_redacts_secret() {
        let spec = ClientSpec {
            client_id: "client".to_string(),
            client_secret: "super-secret".to_string(),
            scopes: vec!["openid".to_string()],
        };
        assert!(!format!("{:?}", spec).contains("super-secret"));
    }
}
