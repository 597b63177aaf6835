// [crates/wopr-billing/src/tenant_status.rs]
//! Tenant Status state machine (C2). Persistence lives in
//! `wopr-db::TenantStatusStore`; this module owns the transition rules
//! and the suspend/ban cascades into the bot repository and ledger.

use crate::errors::BillingError;
use crate::ledger::CreditLedger;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use wopr_core::Credit;
use wopr_db::repositories::bot_instance::BotInstanceStore;
use wopr_db::repositories::ledger::CreditLedgerStore;
use wopr_db::repositories::tenant_status::TenantStatusStore;
use wopr_models::billing::{TenantLifecycleStatus, TenantStatusRecord, TransactionType};

/// Default retention window before a suspended bot is eligible for
/// hard deletion.
fn default_retention() -> Duration {
    Duration::days(14)
}

pub struct CascadeResult {
    pub status: TenantStatusRecord,
    pub suspended_bot_ids: Vec<Uuid>,
    pub refunded: Option<Credit>,
}

pub struct TenantStatusManager<T, B, L> {
    statuses: Arc<T>,
    bots: Arc<B>,
    ledger: CreditLedger<L>,
}

impl<T, B, L> TenantStatusManager<T, B, L>
where
    T: TenantStatusStore,
    B: BotInstanceStore,
    L: CreditLedgerStore,
{
    pub fn new(statuses: Arc<T>, bots: Arc<B>, ledger: CreditLedger<L>) -> Self {
        Self { statuses, bots, ledger }
    }

    pub async fn get_status(&self, tenant: &str) -> Result<TenantStatusRecord, BillingError> {
        Ok(self.statuses.get(tenant).await?)
    }

    /// Row absence defaults to `active` already (`TenantStatusStore::get`);
    /// this just forces the row to be written once, for callers that
    /// need an explicit row to exist (e.g. signup).
    pub async fn ensure_exists(&self, tenant: &str) -> Result<TenantStatusRecord, BillingError> {
        let current = self.statuses.get(tenant).await?;
        self.statuses.upsert(&current).await?;
        Ok(current)
    }

    pub async fn set_grace_period(&self, tenant: &str, by: &str) -> Result<TenantStatusRecord, BillingError> {
        let mut record = self.statuses.get(tenant).await?;
        record.status = TenantLifecycleStatus::GracePeriod;
        record.reason = None;
        record.changed_at = Utc::now();
        record.changed_by = by.to_string();
        self.statuses.upsert(&record).await?;
        Ok(record)
    }

    pub async fn suspend(&self, tenant: &str, reason: &str, by: &str) -> Result<CascadeResult, BillingError> {
        let current = self.statuses.get(tenant).await?;
        match current.status {
            TenantLifecycleStatus::Banned => {
                return Err(BillingError::InvalidTransition("Cannot suspend a banned account".into()))
            }
            TenantLifecycleStatus::Suspended => {
                return Err(BillingError::InvalidTransition("already suspended".into()))
            }
            TenantLifecycleStatus::Active | TenantLifecycleStatus::GracePeriod => {}
        }

        let mut record = current;
        record.status = TenantLifecycleStatus::Suspended;
        record.reason = Some(reason.to_string());
        record.changed_at = Utc::now();
        record.changed_by = by.to_string();
        self.statuses.upsert(&record).await?;

        let suspended_bot_ids = self.bots.suspend_all_for_tenant(tenant, default_retention()).await?;

        Ok(CascadeResult { status: record, suspended_bot_ids, refunded: None })
    }

    pub async fn reactivate(&self, tenant: &str, by: &str) -> Result<TenantStatusRecord, BillingError> {
        let mut record = self.statuses.get(tenant).await?;
        match record.status {
            TenantLifecycleStatus::Banned => {
                return Err(BillingError::InvalidTransition("Cannot reactivate a banned account".into()))
            }
            TenantLifecycleStatus::Active => {
                return Err(BillingError::InvalidTransition("already active".into()))
            }
            TenantLifecycleStatus::Suspended | TenantLifecycleStatus::GracePeriod => {}
        }

        record.status = TenantLifecycleStatus::Active;
        record.reason = None;
        record.changed_at = Utc::now();
        record.changed_by = by.to_string();
        self.statuses.upsert(&record).await?;
        Ok(record)
    }

    /// Bans the tenant, cascading a bot-wide suspend and a full-balance
    /// auto-refund (positive balances only — a ban never creates debt).
    pub async fn ban(&self, tenant: &str, reason: &str, by: &str) -> Result<CascadeResult, BillingError> {
        let current = self.statuses.get(tenant).await?;
        if current.status == TenantLifecycleStatus::Banned {
            return Err(BillingError::InvalidTransition("already banned".into()));
        }

        let mut record = current;
        record.status = TenantLifecycleStatus::Banned;
        record.reason = Some(reason.to_string());
        record.changed_at = Utc::now();
        record.changed_by = by.to_string();
        self.statuses.upsert(&record).await?;

        let suspended_bot_ids = self.bots.suspend_all_for_tenant(tenant, default_retention()).await?;

        let balance = self.ledger.balance(tenant).await?;
        let refunded = if balance.is_positive() {
            self.ledger
                .debit(
                    tenant,
                    balance,
                    TransactionType::Correction,
                    Some("ban auto-refund".into()),
                    Some(format!("ban:refund:{tenant}")),
                    true,
                )
                .await?;
            Some(balance)
        } else {
            None
        };

        Ok(CascadeResult { status: record, suspended_bot_ids, refunded })
    }
}
