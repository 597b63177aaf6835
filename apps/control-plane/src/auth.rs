// [apps/control-plane/src/auth.rs]
//! Concrete `AuthResolver`/`CredentialResolver` seams, backed by the
//! api_keys / provider_credentials tables and the tenant vault keys.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use wopr_db::repositories::{ApiKeyStore, CredentialStore};
use wopr_gateway::{AuthContext, AuthResolver, CredentialResolver, GatewayError};
use wopr_vault::{derive_tenant_key, open_string};

/// Bearer tokens are never stored raw; callers hash before issuing and
/// before looking up so a leaked database dump can't be replayed.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SqlAuthResolver<A> {
    store: Arc<A>,
}

impl<A> SqlAuthResolver<A> {
    pub fn new(store: Arc<A>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<A> AuthResolver for SqlAuthResolver<A>
where
    A: ApiKeyStore,
{
    async fn resolve(&self, bearer_token: &str) -> Result<AuthContext, GatewayError> {
        let hash = hash_token(bearer_token);
        let record = self.store.resolve(&hash).await?.ok_or(GatewayError::AuthRequired)?;
        Ok(AuthContext { tenant: record.tenant, instance_id: record.instance_id })
    }
}

/// Resolves a tenant's stored provider credential, decrypting it with a
/// key derived from the root vault secret. A credential that fails to
/// decrypt (wrong key, corrupted row) is treated the same as a missing
/// one — the caller can't use it either way.
pub struct VaultCredentialResolver<C> {
    store: Arc<C>,
    vault_secret: Vec<u8>,
}

impl<C> VaultCredentialResolver<C> {
    pub fn new(store: Arc<C>, vault_secret: Vec<u8>) -> Self {
        Self { store, vault_secret }
    }
}

#[async_trait]
impl<C> CredentialResolver for VaultCredentialResolver<C>
where
    C: CredentialStore,
{
    async fn resolve(&self, tenant: &str, provider: &str) -> Result<String, GatewayError> {
        let row = self
            .store
            .get(tenant, provider)
            .await?
            .ok_or_else(|| GatewayError::CredentialMissing(provider.to_string()))?;
        let key = derive_tenant_key(&self.vault_secret, tenant);
        open_string(&key, &row.encrypted_value).map_err(|_| GatewayError::CredentialMissing(provider.to_string()))
    }
}
