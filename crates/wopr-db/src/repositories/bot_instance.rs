// [crates/wopr-db/src/repositories/bot_instance.rs]
//! Bot Instance Repository (C4). CRUD plus `reassign`, `setBillingState`,
//! `listByNode`, `listByTenant`. No foreign key from bots to users or
//! tenants — deleting a user never cascades to bots (§4.4).

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::{params, Row};
use uuid::Uuid;
use wopr_models::bot::{BillingState, BotInstance};

#[async_trait]
pub trait BotInstanceStore: Send + Sync {
    async fn create(&self, instance: &BotInstance) -> Result<(), DbError>;
    async fn get(&self, id: Uuid) -> Result<BotInstance, DbError>;
    async fn reassign(&self, id: Uuid, node: Option<&str>) -> Result<(), DbError>;
    async fn set_billing_state(
        &self,
        id: Uuid,
        state: BillingState,
        retention_window: Duration,
    ) -> Result<(), DbError>;
    async fn list_by_node(&self, node: &str) -> Result<Vec<BotInstance>, DbError>;
    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<BotInstance>, DbError>;
    /// Suspends every active bot for a tenant; returns the suspended ids.
    /// Used by the tenant-status cascade (§4.2).
    async fn suspend_all_for_tenant(
        &self,
        tenant: &str,
        retention_window: Duration,
    ) -> Result<Vec<Uuid>, DbError>;
    async fn count_active_for_tenant(&self, tenant: &str) -> Result<u64, DbError>;
}

pub struct SqlBotInstanceStore {
    db: DbClient,
}

impl SqlBotInstanceStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BotInstanceStore for SqlBotInstanceStore {
    async fn create(&self, instance: &BotInstance) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO bot_instances \
             (id, tenant, name, node_id, billing_state, suspended_at, destroy_after, \
              resource_tier, storage_tier, created_by_user_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                instance.id.to_string(),
                instance.tenant.clone(),
                instance.name.clone(),
                instance.node_id.clone(),
                billing_state_to_str(instance.billing_state),
                instance.suspended_at.map(|d| d.to_rfc3339()),
                instance.destroy_after.map(|d| d.to_rfc3339()),
                instance.resource_tier.clone(),
                instance.storage_tier.clone(),
                instance.created_by_user_id.clone(),
                instance.created_at.to_rfc3339(),
                instance.updated_at.to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<BotInstance, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, tenant, name, node_id, billing_state, suspended_at, destroy_after, \
                 resource_tier, storage_tier, created_by_user_id, created_at, updated_at \
                 FROM bot_instances WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => map_row(&row),
            None => Err(DbError::NotFound(format!("bot instance {id}"))),
        }
    }

    async fn reassign(&self, id: Uuid, node: Option<&str>) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        let affected = conn
            .execute(
                "UPDATE bot_instances SET node_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), node, Utc::now().to_rfc3339()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("bot instance {id}")));
        }
        Ok(())
    }

    async fn set_billing_state(
        &self,
        id: Uuid,
        state: BillingState,
        retention_window: Duration,
    ) -> Result<(), DbError> {
        let conn = self.db.connection()?;
        let now = Utc::now();
        let (suspended_at, destroy_after) = match state {
            BillingState::Suspended => (Some(now), Some(now + retention_window)),
            _ => (None, None),
        };

        let affected = conn
            .execute(
                "UPDATE bot_instances SET billing_state = ?2, suspended_at = ?3, destroy_after = ?4, \
                 updated_at = ?5 WHERE id = ?1",
                params![
                    id.to_string(),
                    billing_state_to_str(state),
                    suspended_at.map(|d| d.to_rfc3339()),
                    destroy_after.map(|d| d.to_rfc3339()),
                    now.to_rfc3339()
                ],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("bot instance {id}")));
        }
        Ok(())
    }

    async fn list_by_node(&self, node: &str) -> Result<Vec<BotInstance>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, tenant, name, node_id, billing_state, suspended_at, destroy_after, \
                 resource_tier, storage_tier, created_by_user_id, created_at, updated_at \
                 FROM bot_instances WHERE node_id = ?1",
                params![node],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }

    async fn list_by_tenant(&self, tenant: &str) -> Result<Vec<BotInstance>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, tenant, name, node_id, billing_state, suspended_at, destroy_after, \
                 resource_tier, storage_tier, created_by_user_id, created_at, updated_at \
                 FROM bot_instances WHERE tenant = ?1",
                params![tenant],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }

    async fn suspend_all_for_tenant(
        &self,
        tenant: &str,
        retention_window: Duration,
    ) -> Result<Vec<Uuid>, DbError> {
        let conn = self.db.connection()?;
        let now = Utc::now();
        let destroy_after = now + retention_window;

        let mut rows = conn
            .query(
                "SELECT id FROM bot_instances WHERE tenant = ?1 AND billing_state = 'active'",
                params![tenant],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let raw: String = row.get(0)?;
            ids.push(Uuid::parse_str(&raw).map_err(|e| DbError::Mapping(e.to_string()))?);
        }

        conn.execute(
            "UPDATE bot_instances SET billing_state = 'suspended', suspended_at = ?2, \
             destroy_after = ?3, updated_at = ?2 WHERE tenant = ?1 AND billing_state = 'active'",
            params![tenant, now.to_rfc3339(), destroy_after.to_rfc3339()],
        )
        .await?;

        Ok(ids)
    }

    async fn count_active_for_tenant(&self, tenant: &str) -> Result<u64, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM bot_instances WHERE tenant = ?1 AND billing_state = 'active'",
                params![tenant],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }
}

fn billing_state_to_str(s: BillingState) -> &'static str {
    match s {
        BillingState::Active => "active",
        BillingState::Suspended => "suspended",
        BillingState::Destroyed => "destroyed",
    }
}

fn str_to_billing_state(s: &str) -> Result<BillingState, DbError> {
    Ok(match s {
        "active" => BillingState::Active,
        "suspended" => BillingState::Suspended,
        "destroyed" => BillingState::Destroyed,
        other => return Err(DbError::Mapping(format!("unknown billing state '{other}'"))),
    })
}

fn map_row(row: &Row) -> Result<BotInstance, DbError> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let name: String = row.get(2)?;
    let node_id: Option<String> = row.get(3)?;
    let billing_state: String = row.get(4)?;
    let suspended_at: Option<String> = row.get(5)?;
    let destroy_after: Option<String> = row.get(6)?;
    let resource_tier: String = row.get(7)?;
    let storage_tier: String = row.get(8)?;
    let created_by_user_id: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(BotInstance {
        id: Uuid::parse_str(&id).map_err(|e| DbError::Mapping(e.to_string()))?,
        tenant,
        name,
        node_id,
        billing_state: str_to_billing_state(&billing_state)?,
        suspended_at: suspended_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        destroy_after: destroy_after.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        resource_tier,
        storage_tier,
        created_by_user_id,
        created_at: created_at.parse().map_err(|_| DbError::Mapping("bad created_at".into()))?,
        updated_at: updated_at.parse().map_err(|_| DbError::Mapping("bad updated_at".into()))?,
    })
}
