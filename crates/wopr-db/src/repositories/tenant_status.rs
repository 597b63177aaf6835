// [crates/wopr-db/src/repositories/tenant_status.rs]
//! Tenant Status Store persistence (C2). State-machine *rules* live in
//! `wopr-billing::tenant_status`; this repository only persists rows.
//! Absence of a row is equivalent to `active`, per §3.

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use wopr_models::billing::{TenantLifecycleStatus, TenantStatusRecord};

#[async_trait]
pub trait TenantStatusStore: Send + Sync {
    async fn get(&self, tenant: &str) -> Result<TenantStatusRecord, DbError>;
    async fn upsert(&self, record: &TenantStatusRecord) -> Result<(), DbError>;
}

pub struct SqlTenantStatusStore {
    db: DbClient,
}

impl SqlTenantStatusStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TenantStatusStore for SqlTenantStatusStore {
    async fn get(&self, tenant: &str) -> Result<TenantStatusRecord, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT tenant, status, reason, changed_at, changed_by, grace_deadline, data_delete_after \
                 FROM tenant_status WHERE tenant = ?1",
                params![tenant],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let tenant: String = row.get(0)?;
                let status: String = row.get(1)?;
                let reason: Option<String> = row.get(2)?;
                let changed_at: String = row.get(3)?;
                let changed_by: String = row.get(4)?;
                let grace_deadline: Option<String> = row.get(5)?;
                let data_delete_after: Option<String> = row.get(6)?;

                Ok(TenantStatusRecord {
                    tenant,
                    status: str_to_status(&status)?,
                    reason,
                    changed_at: changed_at.parse().map_err(|_| DbError::Mapping("bad changed_at".into()))?,
                    changed_by,
                    grace_deadline: grace_deadline.and_then(|s| s.parse().ok()),
                    data_delete_after: data_delete_after.and_then(|s| s.parse().ok()),
                })
            }
            None => Ok(TenantStatusRecord {
                tenant: tenant.to_string(),
                status: TenantLifecycleStatus::Active,
                reason: None,
                changed_at: Utc::now(),
                changed_by: "system".into(),
                grace_deadline: None,
                data_delete_after: None,
            }),
        }
    }

    async fn upsert(&self, record: &TenantStatusRecord) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO tenant_status \
             (tenant, status, reason, changed_at, changed_by, grace_deadline, data_delete_after) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(tenant) DO UPDATE SET \
               status = excluded.status, reason = excluded.reason, changed_at = excluded.changed_at, \
               changed_by = excluded.changed_by, grace_deadline = excluded.grace_deadline, \
               data_delete_after = excluded.data_delete_after",
            params![
                record.tenant.clone(),
                status_to_str(record.status),
                record.reason.clone(),
                record.changed_at.to_rfc3339(),
                record.changed_by.clone(),
                record.grace_deadline.map(|d| d.to_rfc3339()),
                record.data_delete_after.map(|d| d.to_rfc3339())
            ],
        )
        .await?;
        Ok(())
    }
}

fn status_to_str(s: TenantLifecycleStatus) -> &'static str {
    match s {
        TenantLifecycleStatus::Active => "active",
        TenantLifecycleStatus::GracePeriod => "grace_period",
        TenantLifecycleStatus::Suspended => "suspended",
        TenantLifecycleStatus::Banned => "banned",
    }
}

fn str_to_status(s: &str) -> Result<TenantLifecycleStatus, DbError> {
    Ok(match s {
        "active" => TenantLifecycleStatus::Active,
        "grace_period" => TenantLifecycleStatus::GracePeriod,
        "suspended" => TenantLifecycleStatus::Suspended,
        "banned" => TenantLifecycleStatus::Banned,
        other => return Err(DbError::Mapping(format!("unknown tenant status '{other}'"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_row_defaults_to_active() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlTenantStatusStore::new(db);
        let record = store.get("never-seen").await.unwrap();
        assert_eq!(record.status, TenantLifecycleStatus::Active);
    }

    #[tokio::test]
    async fn upsert_roundtrips() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlTenantStatusStore::new(db);
        let mut record = store.get("t1").await.unwrap();
        record.status = TenantLifecycleStatus::Suspended;
        record.reason = Some("nonpayment".into());
        store.upsert(&record).await.unwrap();

        let reloaded = store.get("t1").await.unwrap();
        assert_eq!(reloaded.status, TenantLifecycleStatus::Suspended);
        assert_eq!(reloaded.reason.as_deref(), Some("nonpayment"));
    }
}
