// [crates/wopr-db/src/repositories/api_key.rs]
//! API key lookups backing the gateway's AuthResolver (§4.14 step 1).
//! Tokens are stored as a SHA-256 hash; the raw bearer value is never
//! persisted.

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use wopr_models::auth::ApiKeyRecord;

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn issue(&self, token_hash: &str, tenant: &str, instance_id: &str) -> Result<(), DbError>;
    async fn resolve(&self, token_hash: &str) -> Result<Option<ApiKeyRecord>, DbError>;
    async fn revoke(&self, token_hash: &str) -> Result<(), DbError>;
}

pub struct SqlApiKeyStore {
    db: DbClient,
}

impl SqlApiKeyStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ApiKeyStore for SqlApiKeyStore {
    async fn issue(&self, token_hash: &str, tenant: &str, instance_id: &str) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO api_keys (token_hash, tenant, instance_id, created_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(token_hash) DO UPDATE SET tenant = excluded.tenant, instance_id = excluded.instance_id",
            params![token_hash, tenant, instance_id, Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    async fn resolve(&self, token_hash: &str) -> Result<Option<ApiKeyRecord>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT token_hash, tenant, instance_id, created_at FROM api_keys WHERE token_hash = ?1",
                params![token_hash],
            )
            .await?;
        match rows.next().await? {
            Some(row) => {
                let token_hash: String = row.get(0)?;
                let tenant: String = row.get(1)?;
                let instance_id: String = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok(Some(ApiKeyRecord {
                    token_hash,
                    tenant,
                    instance_id,
                    created_at: created_at.parse().map_err(|_| DbError::Mapping("bad created_at".into()))?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn revoke(&self, token_hash: &str) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute("DELETE FROM api_keys WHERE token_hash = ?1", params![token_hash]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issue_then_resolve_roundtrips() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlApiKeyStore::new(db);
        store.issue("hash1", "t1", "inst-1").await.unwrap();
        let record = store.resolve("hash1").await.unwrap().unwrap();
        assert_eq!(record.tenant, "t1");
        assert_eq!(record.instance_id, "inst-1");
    }

    #[tokio::test]
    async fn unknown_hash_resolves_to_none() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlApiKeyStore::new(db);
        assert!(store.resolve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reissue_overwrites_mapping() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlApiKeyStore::new(db);
        store.issue("hash1", "t1", "inst-1").await.unwrap();
        store.issue("hash1", "t2", "inst-2").await.unwrap();
        let record = store.resolve("hash1").await.unwrap().unwrap();
        assert_eq!(record.tenant, "t2");
    }
}
