// [crates/wopr-billing/src/ledger.rs]
//! Credit Ledger (C1). Thin domain wrapper around `CreditLedgerStore`
//! exposing the `credit`/`debit` vocabulary instead of a raw signed
//! amount, so callers can't flip the sign by mistake.

use crate::errors::BillingError;
use std::sync::Arc;
use wopr_core::Credit;
use wopr_db::repositories::ledger::CreditLedgerStore;
use wopr_models::billing::{CreditTransaction, TenantId, TransactionType};

pub struct CreditLedger<L> {
    store: Arc<L>,
}

impl<L> CreditLedger<L>
where
    L: CreditLedgerStore,
{
    pub fn new(store: Arc<L>) -> Self {
        Self { store }
    }

    pub async fn credit(
        &self,
        tenant: &str,
        amount: Credit,
        tx_type: TransactionType,
        description: Option<String>,
        reference_id: Option<String>,
        funding_source: Option<String>,
    ) -> Result<CreditTransaction, BillingError> {
        debug_assert!(!amount.is_negative(), "credit() called with a negative amount");
        self.store
            .apply_transaction(tenant, amount, tx_type, description, reference_id, funding_source, false)
            .await
            .map_err(BillingError::from)
    }

    pub async fn debit(
        &self,
        tenant: &str,
        amount: Credit,
        tx_type: TransactionType,
        description: Option<String>,
        reference_id: Option<String>,
        allow_negative: bool,
    ) -> Result<CreditTransaction, BillingError> {
        debug_assert!(!amount.is_negative(), "debit() called with a negative amount");
        self.store
            .apply_transaction(tenant, -amount, tx_type, description, reference_id, None, allow_negative)
            .await
            .map_err(|e| match e {
                wopr_db::DbError::InsufficientCredits => BillingError::InsufficientCredits,
                other => BillingError::Db(other),
            })
    }

    pub async fn balance(&self, tenant: &str) -> Result<Credit, BillingError> {
        Ok(self.store.balance(tenant).await?)
    }

    pub async fn has_reference_id(&self, reference_id: &str) -> Result<bool, BillingError> {
        Ok(self.store.has_reference_id(reference_id).await?)
    }

    pub async fn history(
        &self,
        tenant: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CreditTransaction>, BillingError> {
        Ok(self.store.history(tenant, limit, offset).await?)
    }

    pub async fn tenants_with_balance(&self) -> Result<Vec<(TenantId, Credit)>, BillingError> {
        Ok(self.store.tenants_with_balance().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wopr_db::repositories::ledger::SqlCreditLedgerStore;
    use wopr_db::DbClient;

    async fn ledger() -> CreditLedger<SqlCreditLedgerStore> {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        CreditLedger::new(Arc::new(SqlCreditLedgerStore::new(db)))
    }

    #[tokio::test]
    async fn credit_then_debit_tracks_balance() {
        let l = ledger().await;
        l.credit("t1", Credit::new(1000), TransactionType::SignupGrant, None, None, None).await.unwrap();
        l.debit("t1", Credit::new(400), TransactionType::UsageCharge, None, None, false).await.unwrap();
        assert_eq!(l.balance("t1").await.unwrap(), Credit::new(600));
    }

    #[tokio::test]
    async fn debit_past_zero_rejected() {
        let l = ledger().await;
        let err = l.debit("t1", Credit::new(10), TransactionType::UsageCharge, None, None, false).await;
        assert!(matches!(err, Err(BillingError::InsufficientCredits)));
    }
}
