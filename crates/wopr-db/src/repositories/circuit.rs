// [crates/wopr-db/src/repositories/circuit.rs]
//! Per-instance failure-count persistence backing the Circuit Breaker
//! (C16). `increment_or_reset` reads and writes the row inside a single
//! transaction so two concurrent gateway requests for the same
//! `instance_id` never lose an increment.

use crate::errors::DbError;
use crate::DbClient;
use chrono::{DateTime, Utc};
use libsql::{params, Transaction};
use wopr_models::gateway::CircuitState;

pub struct SqlCircuitStateStore {
    db: DbClient,
}

impl SqlCircuitStateStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    pub async fn get(&self, instance_id: &str) -> Result<Option<CircuitState>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT instance_id, count, window_start, tripped_at FROM circuit_state WHERE instance_id = ?1",
                params![instance_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => {
                let instance_id: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let window_start: String = row.get(2)?;
                let tripped_at: Option<String> = row.get(3)?;
                Ok(Some(CircuitState {
                    instance_id,
                    count: count as u32,
                    window_start: window_start
                        .parse()
                        .map_err(|_| DbError::Mapping("bad window_start".into()))?,
                    tripped_at: tripped_at.and_then(|s| s.parse().ok()),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_in_tx(tx: &Transaction, instance_id: &str) -> Result<Option<CircuitState>, DbError> {
        let mut rows = tx
            .query(
                "SELECT instance_id, count, window_start, tripped_at FROM circuit_state WHERE instance_id = ?1",
                params![instance_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => {
                let instance_id: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let window_start: String = row.get(2)?;
                let tripped_at: Option<String> = row.get(3)?;
                Ok(Some(CircuitState {
                    instance_id,
                    count: count as u32,
                    window_start: window_start
                        .parse()
                        .map_err(|_| DbError::Mapping("bad window_start".into()))?,
                    tripped_at: tripped_at.and_then(|s| s.parse().ok()),
                }))
            }
            None => Ok(None),
        }
    }

    /// Increments the failure count if `window_start` is still current,
    /// otherwise resets to a fresh window of 1. The read and the write
    /// happen inside one transaction so two concurrent callers for the
    /// same `instance_id` can't both read the same count and both write
    /// `count + 1`, losing an increment.
    pub async fn increment_or_reset(
        &self,
        instance_id: &str,
        window_start: DateTime<Utc>,
    ) -> Result<CircuitState, DbError> {
        let conn = self.db.connection()?;
        let tx = conn.transaction().await?;

        let current = Self::get_in_tx(&tx, instance_id).await?;

        let (count, effective_window) = match &current {
            Some(existing) if existing.window_start >= window_start => {
                (existing.count + 1, existing.window_start)
            }
            _ => (1, window_start),
        };

        tx.execute(
            "INSERT INTO circuit_state (instance_id, count, window_start, tripped_at) \
             VALUES (?1, ?2, ?3, NULL) \
             ON CONFLICT(instance_id) DO UPDATE SET count = ?2, window_start = ?3, tripped_at = NULL",
            params![instance_id, count as i64, effective_window.to_rfc3339()],
        )
        .await?;

        tx.commit().await?;

        Ok(CircuitState {
            instance_id: instance_id.to_string(),
            count,
            window_start: effective_window,
            tripped_at: None,
        })
    }

    pub async fn trip(&self, instance_id: &str) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "UPDATE circuit_state SET tripped_at = ?2 WHERE instance_id = ?1",
            params![instance_id, Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    pub async fn reset(&self, instance_id: &str) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "UPDATE circuit_state SET count = 0, tripped_at = NULL WHERE instance_id = ?1",
            params![instance_id],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn increment_resets_on_stale_window() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlCircuitStateStore::new(db);
        let w1 = Utc::now();

        store.increment_or_reset("bot-1", w1).await.unwrap();
        let second = store.increment_or_reset("bot-1", w1).await.unwrap();
        assert_eq!(second.count, 2);

        let w2 = w1 + Duration::minutes(10);
        let after_new_window = store.increment_or_reset("bot-1", w2).await.unwrap();
        assert_eq!(after_new_window.count, 1);
    }

    #[tokio::test]
    async fn trip_then_reset_clears_tripped_at() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlCircuitStateStore::new(db);
        store.increment_or_reset("bot-1", Utc::now()).await.unwrap();
        store.trip("bot-1").await.unwrap();

        let tripped = store.get("bot-1").await.unwrap().unwrap();
        assert!(tripped.tripped_at.is_some());

        store.reset("bot-1").await.unwrap();
        let reset = store.get("bot-1").await.unwrap().unwrap();
        assert!(reset.tripped_at.is_none());
        assert_eq!(reset.count, 0);
    }
}
