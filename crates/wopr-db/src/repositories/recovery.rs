// [crates/wopr-db/src/repositories/recovery.rs]
//! Recovery Event/Item persistence backing the Recovery Orchestrator (C10).

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::Utc;
use libsql::{params, Row};
use uuid::Uuid;
use wopr_models::fleet::{
    RecoveryEvent, RecoveryItem, RecoveryItemStatus, RecoveryStatus, RecoveryTrigger,
};

#[async_trait]
pub trait RecoveryStore: Send + Sync {
    async fn create_event(&self, event: &RecoveryEvent) -> Result<(), DbError>;
    async fn update_event_status(
        &self,
        id: Uuid,
        status: RecoveryStatus,
        report: &str,
    ) -> Result<(), DbError>;
    async fn get_event(&self, id: Uuid) -> Result<RecoveryEvent, DbError>;
    async fn create_item(&self, item: &RecoveryItem) -> Result<(), DbError>;
    async fn update_item(
        &self,
        id: Uuid,
        status: RecoveryItemStatus,
        reason: Option<String>,
    ) -> Result<(), DbError>;
    async fn items_for_event(&self, event: Uuid) -> Result<Vec<RecoveryItem>, DbError>;
    async fn increment_item_retry(&self, id: Uuid) -> Result<u32, DbError>;
    /// Closes every `in_progress` recovery event for `node`, marking it
    /// `completed` with `completed_at = now` — called when the node
    /// re-registers (§4.7: "any recovery_events for this node still
    /// in_progress are closed"). Returns the closed event ids.
    async fn close_in_progress_for_node(&self, node: &str) -> Result<Vec<Uuid>, DbError>;
}

pub struct SqlRecoveryStore {
    db: DbClient,
}

impl SqlRecoveryStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecoveryStore for SqlRecoveryStore {
    async fn create_event(&self, event: &RecoveryEvent) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO recovery_events \
             (id, node, trigger, status, tenants_total, tenants_recovered, tenants_failed, \
              tenants_waiting, started_at, completed_at, report) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.id.to_string(),
                event.node.clone(),
                trigger_to_str(event.trigger),
                status_to_str(event.status),
                event.tenants_total as i64,
                event.tenants_recovered as i64,
                event.tenants_failed as i64,
                event.tenants_waiting as i64,
                event.started_at.to_rfc3339(),
                event.completed_at.map(|d| d.to_rfc3339()),
                event.report.clone()
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_event_status(
        &self,
        id: Uuid,
        status: RecoveryStatus,
        report: &str,
    ) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        let completed_at = match status {
            RecoveryStatus::InProgress => None,
            _ => Some(Utc::now().to_rfc3339()),
        };

        let mut item_rows = conn
            .query(
                "SELECT status FROM recovery_items WHERE event = ?1",
                params![id.to_string()],
            )
            .await?;
        let mut recovered = 0i64;
        let mut failed = 0i64;
        let mut waiting = 0i64;
        while let Some(row) = item_rows.next().await? {
            let s: String = row.get(0)?;
            match s.as_str() {
                "recovered" => recovered += 1,
                "failed" => failed += 1,
                _ => waiting += 1,
            }
        }

        let affected = conn
            .execute(
                "UPDATE recovery_events SET status = ?2, report = ?3, completed_at = ?4, \
                 tenants_recovered = ?5, tenants_failed = ?6, tenants_waiting = ?7 WHERE id = ?1",
                params![
                    id.to_string(),
                    status_to_str(status),
                    report,
                    completed_at,
                    recovered,
                    failed,
                    waiting
                ],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("recovery event {id}")));
        }
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<RecoveryEvent, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, node, trigger, status, tenants_total, tenants_recovered, \
                 tenants_failed, tenants_waiting, started_at, completed_at, report \
                 FROM recovery_events WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => map_event(&row),
            None => Err(DbError::NotFound(format!("recovery event {id}"))),
        }
    }

    async fn create_item(&self, item: &RecoveryItem) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO recovery_items \
             (id, event, tenant, source_node, target_node, backup_key, status, reason, \
              retry_count, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.id.to_string(),
                item.event.to_string(),
                item.tenant.clone(),
                item.source_node.clone(),
                item.target_node.clone(),
                item.backup_key.clone(),
                item_status_to_str(item.status),
                item.reason.clone(),
                item.retry_count as i64,
                item.started_at.to_rfc3339(),
                item.completed_at.map(|d| d.to_rfc3339())
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_item(
        &self,
        id: Uuid,
        status: RecoveryItemStatus,
        reason: Option<String>,
    ) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        let completed_at = match status {
            RecoveryItemStatus::Waiting => None,
            _ => Some(Utc::now().to_rfc3339()),
        };
        let affected = conn
            .execute(
                "UPDATE recovery_items SET status = ?2, reason = ?3, completed_at = ?4 WHERE id = ?1",
                params![id.to_string(), item_status_to_str(status), reason, completed_at],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("recovery item {id}")));
        }
        Ok(())
    }

    async fn items_for_event(&self, event: Uuid) -> Result<Vec<RecoveryItem>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, event, tenant, source_node, target_node, backup_key, status, \
                 reason, retry_count, started_at, completed_at FROM recovery_items WHERE event = ?1",
                params![event.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_item(&row)?);
        }
        Ok(out)
    }

    async fn increment_item_retry(&self, id: Uuid) -> Result<u32, DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "UPDATE recovery_items SET retry_count = retry_count + 1 WHERE id = ?1",
            params![id.to_string()],
        )
        .await?;
        let mut rows = conn
            .query("SELECT retry_count FROM recovery_items WHERE id = ?1", params![id.to_string()])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u32),
            None => Err(DbError::NotFound(format!("recovery item {id}"))),
        }
    }

    async fn close_in_progress_for_node(&self, node: &str) -> Result<Vec<Uuid>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id FROM recovery_events WHERE node = ?1 AND status = 'in_progress'",
                params![node],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            ids.push(Uuid::parse_str(&id).map_err(|e| DbError::Mapping(e.to_string()))?);
        }

        if !ids.is_empty() {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE recovery_events SET status = 'completed', completed_at = ?2 \
                 WHERE node = ?1 AND status = 'in_progress'",
                params![node, now],
            )
            .await?;
        }

        Ok(ids)
    }
}

fn trigger_to_str(t: RecoveryTrigger) -> &'static str {
    match t {
        RecoveryTrigger::HeartbeatTimeout => "heartbeat_timeout",
        RecoveryTrigger::Manual => "manual",
    }
}

fn str_to_trigger(s: &str) -> Result<RecoveryTrigger, DbError> {
    Ok(match s {
        "heartbeat_timeout" => RecoveryTrigger::HeartbeatTimeout,
        "manual" => RecoveryTrigger::Manual,
        other => return Err(DbError::Mapping(format!("unknown recovery trigger '{other}'"))),
    })
}

fn status_to_str(s: RecoveryStatus) -> &'static str {
    match s {
        RecoveryStatus::InProgress => "in_progress",
        RecoveryStatus::Completed => "completed",
        RecoveryStatus::Partial => "partial",
        RecoveryStatus::Failed => "failed",
    }
}

fn str_to_status(s: &str) -> Result<RecoveryStatus, DbError> {
    Ok(match s {
        "in_progress" => RecoveryStatus::InProgress,
        "completed" => RecoveryStatus::Completed,
        "partial" => RecoveryStatus::Partial,
        "failed" => RecoveryStatus::Failed,
        other => return Err(DbError::Mapping(format!("unknown recovery status '{other}'"))),
    })
}

fn item_status_to_str(s: RecoveryItemStatus) -> &'static str {
    match s {
        RecoveryItemStatus::Recovered => "recovered",
        RecoveryItemStatus::Failed => "failed",
        RecoveryItemStatus::Waiting => "waiting",
    }
}

fn str_to_item_status(s: &str) -> Result<RecoveryItemStatus, DbError> {
    Ok(match s {
        "recovered" => RecoveryItemStatus::Recovered,
        "failed" => RecoveryItemStatus::Failed,
        "waiting" => RecoveryItemStatus::Waiting,
        other => return Err(DbError::Mapping(format!("unknown recovery item status '{other}'"))),
    })
}

fn map_event(row: &Row) -> Result<RecoveryEvent, DbError> {
    let id: String = row.get(0)?;
    let node: String = row.get(1)?;
    let trigger: String = row.get(2)?;
    let status: String = row.get(3)?;
    let tenants_total: i64 = row.get(4)?;
    let tenants_recovered: i64 = row.get(5)?;
    let tenants_failed: i64 = row.get(6)?;
    let tenants_waiting: i64 = row.get(7)?;
    let started_at: String = row.get(8)?;
    let completed_at: Option<String> = row.get(9)?;
    let report: String = row.get(10)?;

    Ok(RecoveryEvent {
        id: Uuid::parse_str(&id).map_err(|e| DbError::Mapping(e.to_string()))?,
        node,
        trigger: str_to_trigger(&trigger)?,
        status: str_to_status(&status)?,
        tenants_total: tenants_total as u32,
        tenants_recovered: tenants_recovered as u32,
        tenants_failed: tenants_failed as u32,
        tenants_waiting: tenants_waiting as u32,
        started_at: started_at.parse().map_err(|_| DbError::Mapping("bad started_at".into()))?,
        completed_at: completed_at.and_then(|s| s.parse().ok()),
        report,
    })
}

fn map_item(row: &Row) -> Result<RecoveryItem, DbError> {
    let id: String = row.get(0)?;
    let event: String = row.get(1)?;
    let tenant: String = row.get(2)?;
    let source_node: String = row.get(3)?;
    let target_node: Option<String> = row.get(4)?;
    let backup_key: String = row.get(5)?;
    let status: String = row.get(6)?;
    let reason: Option<String> = row.get(7)?;
    let retry_count: i64 = row.get(8)?;
    let started_at: String = row.get(9)?;
    let completed_at: Option<String> = row.get(10)?;

    Ok(RecoveryItem {
        id: Uuid::parse_str(&id).map_err(|e| DbError::Mapping(e.to_string()))?,
        event: Uuid::parse_str(&event).map_err(|e| DbError::Mapping(e.to_string()))?,
        tenant,
        source_node,
        target_node,
        backup_key,
        status: str_to_item_status(&status)?,
        reason,
        retry_count: retry_count as u32,
        started_at: started_at.parse().map_err(|_| DbError::Mapping("bad started_at".into()))?,
        completed_at: completed_at.and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(id: Uuid) -> RecoveryEvent {
        RecoveryEvent {
            id,
            node: "n1".into(),
            trigger: RecoveryTrigger::HeartbeatTimeout,
            status: RecoveryStatus::InProgress,
            tenants_total: 2,
            tenants_recovered: 0,
            tenants_failed: 0,
            tenants_waiting: 2,
            started_at: Utc::now(),
            completed_at: None,
            report: String::new(),
        }
    }

    fn sample_item(event: Uuid, tenant: &str) -> RecoveryItem {
        RecoveryItem {
            id: Uuid::new_v4(),
            event,
            tenant: tenant.into(),
            source_node: "n1".into(),
            target_node: None,
            backup_key: format!("backups/{tenant}/latest.tar"),
            status: RecoveryItemStatus::Waiting,
            reason: None,
            retry_count: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn event_status_recomputes_tenant_counts_from_items() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlRecoveryStore::new(db);
        let event_id = Uuid::new_v4();
        store.create_event(&sample_event(event_id)).await.unwrap();

        let item1 = sample_item(event_id, "t1");
        let item2 = sample_item(event_id, "t2");
        store.create_item(&item1).await.unwrap();
        store.create_item(&item2).await.unwrap();

        store.update_item(item1.id, RecoveryItemStatus::Recovered, None).await.unwrap();
        store
            .update_item(item2.id, RecoveryItemStatus::Failed, Some("timeout".into()))
            .await
            .unwrap();

        store
            .update_event_status(event_id, RecoveryStatus::Partial, "1/2 recovered")
            .await
            .unwrap();

        let event = store.get_event(event_id).await.unwrap();
        assert_eq!(event.tenants_recovered, 1);
        assert_eq!(event.tenants_failed, 1);
        assert_eq!(event.tenants_waiting, 0);
        assert_eq!(event.status, RecoveryStatus::Partial);
    }

    #[tokio::test]
    async fn retry_increments_persist() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlRecoveryStore::new(db);
        let event_id = Uuid::new_v4();
        store.create_event(&sample_event(event_id)).await.unwrap();
        let item = sample_item(event_id, "t1");
        store.create_item(&item).await.unwrap();

        let count = store.increment_item_retry(item.id).await.unwrap();
        assert_eq!(count, 1);
        let count2 = store.increment_item_retry(item.id).await.unwrap();
        assert_eq!(count2, 2);
    }

    #[tokio::test]
    async fn closing_in_progress_events_marks_them_completed() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlRecoveryStore::new(db);
        let event_id = Uuid::new_v4();
        store.create_event(&sample_event(event_id)).await.unwrap();

        let mut other = sample_event(Uuid::new_v4());
        other.node = "n2".into();
        store.create_event(&other).await.unwrap();

        let closed = store.close_in_progress_for_node("n1").await.unwrap();
        assert_eq!(closed, vec![event_id]);

        let event = store.get_event(event_id).await.unwrap();
        assert_eq!(event.status, RecoveryStatus::Completed);
        assert!(event.completed_at.is_some());

        // already closed — a second call is a no-op.
        assert!(store.close_in_progress_for_node("n1").await.unwrap().is_empty());

        // the other node's event is untouched.
        assert_eq!(store.get_event(other.id).await.unwrap().status, RecoveryStatus::InProgress);
    }
}
