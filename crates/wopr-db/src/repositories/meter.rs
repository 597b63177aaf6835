// [crates/wopr-db/src/repositories/meter.rs]
//! Metering persistence backing the Meter Aggregator (C15). Raw
//! `MeterEvent` rows plus windowed sums for billing and usage-based
//! auto-topup triggers.

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;
use wopr_core::Credit;
use wopr_models::gateway::{MeterEvent, UsageSummary};

#[async_trait]
pub trait MeterStore: Send + Sync {
    async fn record(&self, event: &MeterEvent) -> Result<(), DbError>;
    /// Sum of `charge_credits` for a tenant within `[start, end)`.
    async fn sum_charge(
        &self,
        tenant: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Credit, DbError>;
    async fn upsert_summary(&self, summary: &UsageSummary) -> Result<(), DbError>;
    async fn summaries_for_tenant(&self, tenant: &str, limit: u32) -> Result<Vec<UsageSummary>, DbError>;
}

pub struct SqlMeterStore {
    db: DbClient,
}

impl SqlMeterStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MeterStore for SqlMeterStore {
    async fn record(&self, event: &MeterEvent) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO meter_events \
             (id, tenant, cost_credits, charge_credits, capability, provider, instance_id, model, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id.to_string(),
                event.tenant.clone(),
                event.cost_credits.cents(),
                event.charge_credits.cents(),
                event.capability.clone(),
                event.provider.clone(),
                event.instance_id.clone(),
                event.model.clone(),
                event.timestamp.to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    async fn sum_charge(
        &self,
        tenant: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Credit, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT COALESCE(SUM(charge_credits), 0) FROM meter_events \
                 WHERE tenant = ?1 AND timestamp >= ?2 AND timestamp < ?3",
                params![tenant, start.to_rfc3339(), end.to_rfc3339()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Credit::new(row.get(0)?)),
            None => Ok(Credit::ZERO),
        }
    }

    async fn upsert_summary(&self, summary: &UsageSummary) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO usage_summaries (tenant, window_start, window_end, total_charge) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(tenant, window_start, window_end) DO UPDATE SET \
               total_charge = excluded.total_charge",
            params![
                summary.tenant.clone(),
                summary.window_start.to_rfc3339(),
                summary.window_end.to_rfc3339(),
                summary.total_charge.cents()
            ],
        )
        .await?;
        Ok(())
    }

    async fn summaries_for_tenant(&self, tenant: &str, limit: u32) -> Result<Vec<UsageSummary>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT tenant, window_start, window_end, total_charge FROM usage_summaries \
                 WHERE tenant = ?1 ORDER BY window_start DESC LIMIT ?2",
                params![tenant, limit as i64],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let tenant: String = row.get(0)?;
            let window_start: String = row.get(1)?;
            let window_end: String = row.get(2)?;
            let total_charge: i64 = row.get(3)?;
            out.push(UsageSummary {
                tenant,
                window_start: window_start.parse().map_err(|_| DbError::Mapping("bad window_start".into()))?,
                window_end: window_end.parse().map_err(|_| DbError::Mapping("bad window_end".into()))?,
                total_charge: Credit::new(total_charge),
            });
        }
        Ok(out)
    }
}
