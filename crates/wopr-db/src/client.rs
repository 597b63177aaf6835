// [crates/wopr-db/src/client.rs]
//! =================================================================
//! Database Connection Client.
//!
//! Thin wrapper over `libsql::Database`. In-memory URLs get an
//! anchor connection held open for the process lifetime so SQLite
//! doesn't reclaim the schema between connections (relevant for
//! tests and for single-node deployments without a real file path).
//! =================================================================

use crate::errors::DbError;
use crate::schema::apply_schema;
use libsql::{Builder, Connection, Database};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct DbClient {
    driver: Arc<Database>,
    _memory_anchor: Option<Arc<Connection>>,
}

impl DbClient {
    #[instrument(skip(access_token))]
    pub async fn connect(url: &str, access_token: Option<String>) -> Result<Self, DbError> {
        if url.is_empty() {
            return Err(DbError::Configuration("DATABASE_URL is empty".into()));
        }

        info!("connecting to control-plane database at {}", url);

        let is_remote = url.starts_with("libsql://") || url.starts_with("https://");
        let is_memory = url.contains(":memory:") || url.contains("mode=memory");

        let driver = if is_remote {
            let token = access_token
                .ok_or_else(|| DbError::Configuration("remote DB requires an access token".into()))?;
            Builder::new_remote(url.to_string(), token).build().await
        } else {
            Builder::new_local(url).build().await
        }
        .map_err(|e| DbError::Connection(e.to_string()))?;

        let driver = Arc::new(driver);
        let mut anchor = None;

        if is_memory {
            let anchor_conn = driver.connect().map_err(|e| DbError::Connection(e.to_string()))?;
            apply_schema(&anchor_conn).await.map_err(|e| DbError::Configuration(e.to_string()))?;
            anchor = Some(Arc::new(anchor_conn));
        } else {
            let bootstrap_conn = driver.connect().map_err(|e| DbError::Connection(e.to_string()))?;
            apply_schema(&bootstrap_conn).await.map_err(|e| DbError::Configuration(e.to_string()))?;
        }

        Ok(Self { driver, _memory_anchor: anchor })
    }

    pub fn connection(&self) -> Result<Connection, DbError> {
        self.driver.connect().map_err(|e| DbError::Connection(e.to_string()))
    }
}
