// [crates/wopr-db/src/repositories/autotopup.rs]
//! Auto-topup settings persistence backing the Auto-topup Engine (C17).
//! `try_acquire_usage_lock`/`release_usage_lock` implement the
//! compare-and-swap that keeps one in-flight charge per tenant at a time.

use crate::errors::DbError;
use crate::DbClient;
use chrono::{DateTime, Utc};
use libsql::params;
use wopr_core::Credit;
use wopr_models::billing::{AutoTopupInterval, AutoTopupSettings};

pub struct SqlAutoTopupStore {
    db: DbClient,
}

impl SqlAutoTopupStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    pub async fn get(&self, tenant: &str) -> Result<Option<AutoTopupSettings>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT tenant, usage_enabled, usage_threshold, usage_topup, usage_charge_in_flight, \
                 usage_consecutive_failures, schedule_enabled, schedule_amount, schedule_interval, \
                 schedule_next_at, schedule_consecutive_failures, payment_method_ref \
                 FROM autotopup_settings WHERE tenant = ?1",
                params![tenant],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn upsert(&self, settings: &AutoTopupSettings) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO autotopup_settings \
             (tenant, usage_enabled, usage_threshold, usage_topup, usage_charge_in_flight, \
              usage_consecutive_failures, schedule_enabled, schedule_amount, schedule_interval, \
              schedule_next_at, schedule_consecutive_failures, payment_method_ref) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(tenant) DO UPDATE SET \
               usage_enabled = excluded.usage_enabled, usage_threshold = excluded.usage_threshold, \
               usage_topup = excluded.usage_topup, usage_charge_in_flight = excluded.usage_charge_in_flight, \
               usage_consecutive_failures = excluded.usage_consecutive_failures, \
               schedule_enabled = excluded.schedule_enabled, schedule_amount = excluded.schedule_amount, \
               schedule_interval = excluded.schedule_interval, schedule_next_at = excluded.schedule_next_at, \
               schedule_consecutive_failures = excluded.schedule_consecutive_failures, \
               payment_method_ref = excluded.payment_method_ref",
            params![
                settings.tenant.clone(),
                settings.usage_enabled,
                settings.usage_threshold.cents(),
                settings.usage_topup.cents(),
                settings.usage_charge_in_flight,
                settings.usage_consecutive_failures as i64,
                settings.schedule_enabled,
                settings.schedule_amount.cents(),
                interval_to_str(settings.schedule_interval),
                settings.schedule_next_at.map(|d| d.to_rfc3339()),
                settings.schedule_consecutive_failures as i64,
                settings.payment_method_ref.clone()
            ],
        )
        .await?;
        Ok(())
    }

    /// Atomically flips `usage_charge_in_flight` from false to true.
    /// Returns `true` if this caller won the lock.
    pub async fn try_acquire_usage_lock(&self, tenant: &str) -> Result<bool, DbError> {
        let conn = self.db.connection()?;
        let affected = conn
            .execute(
                "UPDATE autotopup_settings SET usage_charge_in_flight = 1 \
                 WHERE tenant = ?1 AND usage_charge_in_flight = 0",
                params![tenant],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn release_usage_lock(&self, tenant: &str, succeeded: bool) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        if succeeded {
            conn.execute(
                "UPDATE autotopup_settings SET usage_charge_in_flight = 0, usage_consecutive_failures = 0 \
                 WHERE tenant = ?1",
                params![tenant],
            )
            .await?;
        } else {
            conn.execute(
                "UPDATE autotopup_settings SET usage_charge_in_flight = 0, \
                 usage_consecutive_failures = usage_consecutive_failures + 1 WHERE tenant = ?1",
                params![tenant],
            )
            .await?;
        }
        Ok(())
    }

    pub async fn due_for_scheduled_topup(&self, as_of: DateTime<Utc>) -> Result<Vec<AutoTopupSettings>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT tenant, usage_enabled, usage_threshold, usage_topup, usage_charge_in_flight, \
                 usage_consecutive_failures, schedule_enabled, schedule_amount, schedule_interval, \
                 schedule_next_at, schedule_consecutive_failures, payment_method_ref \
                 FROM autotopup_settings WHERE schedule_enabled = 1 AND schedule_next_at <= ?1",
                params![as_of.to_rfc3339()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }

    pub async fn set_schedule_next_at(&self, tenant: &str, next_at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "UPDATE autotopup_settings SET schedule_next_at = ?2 WHERE tenant = ?1",
            params![tenant, next_at.to_rfc3339()],
        )
        .await?;
        Ok(())
    }
}

fn interval_to_str(i: AutoTopupInterval) -> &'static str {
    match i {
        AutoTopupInterval::Daily => "daily",
        AutoTopupInterval::Weekly => "weekly",
        AutoTopupInterval::Monthly => "monthly",
    }
}

fn str_to_interval(s: &str) -> Result<AutoTopupInterval, DbError> {
    Ok(match s {
        "daily" => AutoTopupInterval::Daily,
        "weekly" => AutoTopupInterval::Weekly,
        "monthly" => AutoTopupInterval::Monthly,
        other => return Err(DbError::Mapping(format!("unknown autotopup interval '{other}'"))),
    })
}

fn map_row(row: &libsql::Row) -> Result<AutoTopupSettings, DbError> {
    let tenant: String = row.get(0)?;
    let usage_enabled: bool = row.get(1)?;
    let usage_threshold: i64 = row.get(2)?;
    let usage_topup: i64 = row.get(3)?;
    let usage_charge_in_flight: bool = row.get(4)?;
    let usage_consecutive_failures: i64 = row.get(5)?;
    let schedule_enabled: bool = row.get(6)?;
    let schedule_amount: i64 = row.get(7)?;
    let schedule_interval: String = row.get(8)?;
    let schedule_next_at: Option<String> = row.get(9)?;
    let schedule_consecutive_failures: i64 = row.get(10)?;
    let payment_method_ref: Option<String> = row.get(11)?;

    Ok(AutoTopupSettings {
        tenant,
        usage_enabled,
        usage_threshold: Credit::new(usage_threshold),
        usage_topup: Credit::new(usage_topup),
        usage_charge_in_flight,
        usage_consecutive_failures: usage_consecutive_failures as u32,
        schedule_enabled,
        schedule_amount: Credit::new(schedule_amount),
        schedule_interval: str_to_interval(&schedule_interval)?,
        schedule_next_at: schedule_next_at.and_then(|s| s.parse().ok()),
        schedule_consecutive_failures: schedule_consecutive_failures as u32,
        payment_method_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tenant: &str) -> AutoTopupSettings {
        AutoTopupSettings {
            tenant: tenant.into(),
            usage_enabled: true,
            usage_threshold: Credit::new(500),
            usage_topup: Credit::new(2000),
            usage_charge_in_flight: false,
            usage_consecutive_failures: 0,
            schedule_enabled: false,
            schedule_amount: Credit::new(1000),
            schedule_interval: AutoTopupInterval::Monthly,
            schedule_next_at: None,
            schedule_consecutive_failures: 0,
            payment_method_ref: Some("pm_123".into()),
        }
    }

    #[tokio::test]
    async fn usage_lock_is_exclusive() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlAutoTopupStore::new(db);
        store.upsert(&sample("t1")).await.unwrap();

        assert!(store.try_acquire_usage_lock("t1").await.unwrap());
        assert!(!store.try_acquire_usage_lock("t1").await.unwrap());

        store.release_usage_lock("t1", true).await.unwrap();
        assert!(store.try_acquire_usage_lock("t1").await.unwrap());
    }

    #[tokio::test]
    async fn failed_release_increments_consecutive_failures() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let store = SqlAutoTopupStore::new(db);
        store.upsert(&sample("t1")).await.unwrap();

        store.try_acquire_usage_lock("t1").await.unwrap();
        store.release_usage_lock("t1", false).await.unwrap();

        let reloaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(reloaded.usage_consecutive_failures, 1);
        assert!(!reloaded.usage_charge_in_flight);
    }
}
