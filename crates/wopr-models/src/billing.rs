// [crates/wopr-models/src/billing.rs]
//! Credit ledger and tenant status entities (§3: CreditTransaction,
//! TenantStatus).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wopr_core::Credit;

pub type TenantId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    SignupGrant,
    Purchase,
    UsageCharge,
    AutoTopup,
    Correction,
    Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: uuid::Uuid,
    pub tenant: TenantId,
    pub amount: Credit,
    pub balance_after: Credit,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub description: Option<String>,
    pub reference_id: Option<String>,
    pub funding_source: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantLifecycleStatus {
    Active,
    GracePeriod,
    Suspended,
    Banned,
}

impl Default for TenantLifecycleStatus {
    fn default() -> Self {
        TenantLifecycleStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantStatusRecord {
    pub tenant: TenantId,
    pub status: TenantLifecycleStatus,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
    pub grace_deadline: Option<DateTime<Utc>>,
    pub data_delete_after: Option<DateTime<Utc>>,
}

/// A tenant's declared billing tier, used only to order recovery
/// (SPEC_FULL.md §9's resolution of the "tier sort order" open
/// question — never consulted by the orchestrator itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TenantTier {
    Free,
    Starter,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoTopupInterval {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTopupSettings {
    pub tenant: TenantId,
    pub usage_enabled: bool,
    pub usage_threshold: Credit,
    pub usage_topup: Credit,
    pub usage_charge_in_flight: bool,
    pub usage_consecutive_failures: u32,
    pub schedule_enabled: bool,
    pub schedule_amount: Credit,
    pub schedule_interval: AutoTopupInterval,
    pub schedule_next_at: Option<DateTime<Utc>>,
    pub schedule_consecutive_failures: u32,
    pub payment_method_ref: Option<String>,
}
