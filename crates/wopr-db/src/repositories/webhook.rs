// [crates/wopr-db/src/repositories/webhook.rs]
//! Webhook signature-failure tracking backing the Webhook Reconciler
//! (C18): per-source-IP failure counters with an escalating backoff.

use crate::errors::DbError;
use crate::DbClient;
use chrono::{DateTime, Utc};
use libsql::params;
use wopr_models::gateway::WebhookSigPenalty;

pub struct SqlWebhookSigPenaltyStore {
    db: DbClient,
}

impl SqlWebhookSigPenaltyStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    pub async fn get(&self, source_ip: &str) -> Result<Option<WebhookSigPenalty>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT source_ip, failures, window_start, backoff_until FROM webhook_sig_penalties \
                 WHERE source_ip = ?1",
                params![source_ip],
            )
            .await?;
        match rows.next().await? {
            Some(row) => {
                let source_ip: String = row.get(0)?;
                let failures: i64 = row.get(1)?;
                let window_start: String = row.get(2)?;
                let backoff_until: Option<String> = row.get(3)?;
                Ok(Some(WebhookSigPenalty {
                    source_ip,
                    failures: failures as u32,
                    window_start: window_start
                        .parse()
                        .map_err(|_| DbError::Mapping("bad window_start".into()))?,
                    backoff_until: backoff_until.and_then(|s| s.parse().ok()),
                }))
            }
            None => Ok(None),
        }
    }

    /// Records a signature failure. The backoff window only escalates
    /// once failures exceed 5 within the window (§4.18) — below that
    /// threshold the counter accumulates but the source stays unblocked.
    pub async fn record_failure(
        &self,
        source_ip: &str,
        now: DateTime<Utc>,
        backoff_for: impl Fn(u32) -> chrono::Duration,
    ) -> Result<WebhookSigPenalty, DbError> {
        let conn = self.db.connection()?;
        let existing = self.get(source_ip).await?;
        let failures = existing.as_ref().map(|p| p.failures + 1).unwrap_or(1);
        let backoff_until = if failures > 5 { Some(now + backoff_for(failures)) } else { None };
        let backoff_until_param = backoff_until.map(|d| d.to_rfc3339());

        conn.execute(
            "INSERT INTO webhook_sig_penalties (source_ip, failures, window_start, backoff_until) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(source_ip) DO UPDATE SET \
               failures = ?2, backoff_until = ?4",
            params![source_ip, failures as i64, now.to_rfc3339(), backoff_until_param],
        )
        .await?;

        Ok(WebhookSigPenalty {
            source_ip: source_ip.to_string(),
            failures,
            window_start: existing.map(|p| p.window_start).unwrap_or(now),
            backoff_until,
        })
    }

    pub async fn clear(&self, source_ip: &str) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute("DELETE FROM webhook_sig_penalties WHERE source_ip = ?1", params![source_ip])
            .await?;
        Ok(())
    }

    pub async fn is_backed_off(&self, source_ip: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        match self.get(source_ip).await? {
            Some(penalty) => Ok(penalty.backoff_until.map(|until| until > now).unwrap_or(false)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn exponential_backoff(failures: u32) -> Duration {
        Duration::seconds(2i64.saturating_pow(failures.min(10)))
    }

    #[tokio::test]
    async fn failures_under_threshold_do_not_back_off() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlWebhookSigPenaltyStore::new(db);
        let now = Utc::now();

        let first = store.record_failure("1.2.3.4", now, exponential_backoff).await.unwrap();
        assert_eq!(first.failures, 1);
        assert!(first.backoff_until.is_none());

        let second = store.record_failure("1.2.3.4", now, exponential_backoff).await.unwrap();
        assert_eq!(second.failures, 2);
        assert!(second.backoff_until.is_none());

        assert!(!store.is_backed_off("1.2.3.4", now).await.unwrap());
    }

    #[tokio::test]
    async fn repeated_failures_escalate_backoff_after_five() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlWebhookSigPenaltyStore::new(db);
        let now = Utc::now();

        let mut last = None;
        for _ in 0..5 {
            last = Some(store.record_failure("1.2.3.4", now, exponential_backoff).await.unwrap());
        }
        let fifth = last.unwrap();
        assert_eq!(fifth.failures, 5);
        assert!(fifth.backoff_until.is_none());
        assert!(!store.is_backed_off("1.2.3.4", now).await.unwrap());

        let sixth = store.record_failure("1.2.3.4", now, exponential_backoff).await.unwrap();
        assert_eq!(sixth.failures, 6);
        assert!(sixth.backoff_until.unwrap() > now);
        assert!(store.is_backed_off("1.2.3.4", now).await.unwrap());
    }

    #[tokio::test]
    async fn clear_removes_penalty() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlWebhookSigPenaltyStore::new(db);
        let now = Utc::now();
        store.record_failure("1.2.3.4", now, exponential_backoff).await.unwrap();
        store.clear("1.2.3.4").await.unwrap();
        assert!(!store.is_backed_off("1.2.3.4", now).await.unwrap());
    }
}
