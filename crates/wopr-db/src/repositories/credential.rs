// [crates/wopr-db/src/repositories/credential.rs]
//! Stored vault-encrypted provider credentials backing the gateway's
//! CredentialResolver (§4.14 step 6, §4.13). Rows hold the ciphertext
//! envelope only; encryption and decryption are `wopr-vault`'s job.

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use wopr_models::auth::ProviderCredential;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, tenant: &str, provider: &str) -> Result<Option<ProviderCredential>, DbError>;
    async fn upsert(&self, tenant: &str, provider: &str, encrypted_value: &str) -> Result<(), DbError>;
    async fn all(&self) -> Result<Vec<ProviderCredential>, DbError>;
}

pub struct SqlCredentialStore {
    db: DbClient,
}

impl SqlCredentialStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for SqlCredentialStore {
    async fn get(&self, tenant: &str, provider: &str) -> Result<Option<ProviderCredential>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT tenant, provider, encrypted_value, updated_at FROM provider_credentials \
                 WHERE tenant = ?1 AND provider = ?2",
                params![tenant, provider],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, tenant: &str, provider: &str, encrypted_value: &str) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO provider_credentials (tenant, provider, encrypted_value, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(tenant, provider) DO UPDATE SET \
               encrypted_value = excluded.encrypted_value, updated_at = excluded.updated_at",
            params![tenant, provider, encrypted_value, Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<ProviderCredential>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query("SELECT tenant, provider, encrypted_value, updated_at FROM provider_credentials", ())
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }
}

fn map_row(row: &libsql::Row) -> Result<ProviderCredential, DbError> {
    let tenant: String = row.get(0)?;
    let provider: String = row.get(1)?;
    let encrypted_value: String = row.get(2)?;
    let updated_at: String = row.get(3)?;
    Ok(ProviderCredential {
        tenant,
        provider,
        encrypted_value,
        updated_at: updated_at.parse().map_err(|_| DbError::Mapping("bad updated_at".into()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlCredentialStore::new(db);
        store.upsert("t1", "openai", "{\"iv\":\"x\"}").await.unwrap();
        let cred = store.get("t1", "openai").await.unwrap().unwrap();
        assert_eq!(cred.encrypted_value, "{\"iv\":\"x\"}");
    }

    #[tokio::test]
    async fn missing_provider_is_none() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlCredentialStore::new(db);
        assert!(store.get("t1", "anthropic").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_value() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlCredentialStore::new(db);
        store.upsert("t1", "openai", "old").await.unwrap();
        store.upsert("t1", "openai", "new").await.unwrap();
        assert_eq!(store.get("t1", "openai").await.unwrap().unwrap().encrypted_value, "new");
    }
}
