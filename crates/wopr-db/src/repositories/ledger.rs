// [crates/wopr-db/src/repositories/ledger.rs]
//! =================================================================
//! Credit Ledger Repository (C1).
//!
//! Implements the §4.1 contract: every mutation is one serialisable
//! transaction that (a) asserts reference_id uniqueness, returning the
//! pre-existing row on a duplicate rather than erroring, (b) reads the
//! current balance, (c) rejects a debit that would go negative unless
//! `allow_negative`, (d) inserts the row with `balance_after`, (e)
//! updates the cached `credit_balances` row.
//! =================================================================

use crate::errors::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::Utc;
use libsql::{params, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;
use wopr_core::Credit;
use wopr_models::billing::{CreditTransaction, TenantId, TransactionType};

#[async_trait]
pub trait CreditLedgerStore: Send + Sync {
    async fn apply_transaction(
        &self,
        tenant: &str,
        amount: Credit,
        tx_type: TransactionType,
        description: Option<String>,
        reference_id: Option<String>,
        funding_source: Option<String>,
        allow_negative: bool,
    ) -> Result<CreditTransaction, DbError>;

    async fn balance(&self, tenant: &str) -> Result<Credit, DbError>;
    async fn has_reference_id(&self, reference_id: &str) -> Result<bool, DbError>;
    async fn history(&self, tenant: &str, limit: u32, offset: u32) -> Result<Vec<CreditTransaction>, DbError>;
    async fn tenants_with_balance(&self) -> Result<Vec<(TenantId, Credit)>, DbError>;
}

pub struct SqlCreditLedgerStore {
    db: DbClient,
}

impl SqlCreditLedgerStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    async fn find_by_reference_id(
        tx: &Transaction,
        reference_id: &str,
    ) -> Result<Option<CreditTransaction>, DbError> {
        let mut rows = tx
            .query(
                "SELECT id, tenant, amount, balance_after, type, description, reference_id, \
                 funding_source, created_at FROM credit_transactions WHERE reference_id = ?1",
                params![reference_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(map_row(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CreditLedgerStore for SqlCreditLedgerStore {
    #[instrument(skip(self, description, funding_source))]
    async fn apply_transaction(
        &self,
        tenant: &str,
        amount: Credit,
        tx_type: TransactionType,
        description: Option<String>,
        reference_id: Option<String>,
        funding_source: Option<String>,
        allow_negative: bool,
    ) -> Result<CreditTransaction, DbError> {
        let conn = self.db.connection()?;
        let tx = conn.transaction().await?;

        if let Some(ref_id) = reference_id.as_deref() {
            if let Some(existing) = Self::find_by_reference_id(&tx, ref_id).await? {
                debug!("reference_id {} already applied, returning existing tx", ref_id);
                tx.commit().await?;
                return Ok(existing);
            }
        }

        let mut balance_rows = tx
            .query("SELECT balance FROM credit_balances WHERE tenant = ?1", params![tenant])
            .await?;
        let current_balance: i64 = match balance_rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let new_balance = current_balance + amount.cents();
        if amount.cents() < 0 && !allow_negative && new_balance < 0 {
            tx.rollback().await.ok();
            return Err(DbError::InsufficientCredits);
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now().to_rfc3339();
        let type_str = tx_type_to_str(tx_type);

        tx.execute(
            "INSERT INTO credit_transactions \
             (id, tenant, amount, balance_after, type, description, reference_id, funding_source, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                tenant,
                amount.cents(),
                new_balance,
                type_str,
                description.clone(),
                reference_id.clone(),
                funding_source.clone(),
                created_at.clone()
            ],
        )
        .await?;

        tx.execute(
            "INSERT INTO credit_balances (tenant, balance) VALUES (?1, ?2) \
             ON CONFLICT(tenant) DO UPDATE SET balance = excluded.balance",
            params![tenant, new_balance],
        )
        .await?;

        tx.commit().await?;

        Ok(CreditTransaction {
            id,
            tenant: tenant.to_string(),
            amount,
            balance_after: Credit::new(new_balance),
            tx_type,
            description,
            reference_id,
            funding_source,
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    async fn balance(&self, tenant: &str) -> Result<Credit, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query("SELECT balance FROM credit_balances WHERE tenant = ?1", params![tenant])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Credit::new(row.get(0)?)),
            None => Ok(Credit::ZERO),
        }
    }

    async fn has_reference_id(&self, reference_id: &str) -> Result<bool, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM credit_transactions WHERE reference_id = ?1",
                params![reference_id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn history(&self, tenant: &str, limit: u32, offset: u32) -> Result<Vec<CreditTransaction>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, tenant, amount, balance_after, type, description, reference_id, \
                 funding_source, created_at FROM credit_transactions WHERE tenant = ?1 \
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                params![tenant, limit as i64, offset as i64],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_row(&row)?);
        }
        Ok(out)
    }

    async fn tenants_with_balance(&self) -> Result<Vec<(TenantId, Credit)>, DbError> {
        let conn = self.db.connection()?;
        let mut rows = conn.query("SELECT tenant, balance FROM credit_balances", ()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let tenant: String = row.get(0)?;
            let balance: i64 = row.get(1)?;
            out.push((tenant, Credit::new(balance)));
        }
        Ok(out)
    }
}

fn tx_type_to_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::SignupGrant => "signup_grant",
        TransactionType::Purchase => "purchase",
        TransactionType::UsageCharge => "usage_charge",
        TransactionType::AutoTopup => "auto_topup",
        TransactionType::Correction => "correction",
        TransactionType::Refund => "refund",
    }
}

fn str_to_tx_type(s: &str) -> Result<TransactionType, DbError> {
    Ok(match s {
        "signup_grant" => TransactionType::SignupGrant,
        "purchase" => TransactionType::Purchase,
        "usage_charge" => TransactionType::UsageCharge,
        "auto_topup" => TransactionType::AutoTopup,
        "correction" => TransactionType::Correction,
        "refund" => TransactionType::Refund,
        other => return Err(DbError::Mapping(format!("unknown transaction type '{other}'"))),
    })
}

fn map_row(row: &libsql::Row) -> Result<CreditTransaction, DbError> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let amount: i64 = row.get(2)?;
    let balance_after: i64 = row.get(3)?;
    let type_str: String = row.get(4)?;
    let description: Option<String> = row.get(5)?;
    let reference_id: Option<String> = row.get(6)?;
    let funding_source: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(CreditTransaction {
        id: Uuid::parse_str(&id).map_err(|e| DbError::Mapping(e.to_string()))?,
        tenant,
        amount: Credit::new(amount),
        balance_after: Credit::new(balance_after),
        tx_type: str_to_tx_type(&type_str)?,
        description,
        reference_id,
        funding_source,
        created_at: created_at.parse().map_err(|_| DbError::Mapping("bad timestamp".into()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbClient;

    async fn test_store() -> SqlCreditLedgerStore {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        SqlCreditLedgerStore::new(db)
    }

    #[tokio::test]
    async fn credit_then_debit_chains_balance_after() {
        let store = test_store().await;
        let tx1 = store
            .apply_transaction("t1", Credit::new(500), TransactionType::Purchase, None, None, None, false)
            .await
            .unwrap();
        assert_eq!(tx1.balance_after, Credit::new(500));

        let tx2 = store
            .apply_transaction("t1", Credit::new(-200), TransactionType::UsageCharge, None, None, None, false)
            .await
            .unwrap();
        assert_eq!(tx2.balance_after, Credit::new(300));
        assert_eq!(store.balance("t1").await.unwrap(), Credit::new(300));
    }

    #[tokio::test]
    async fn debit_below_zero_rejected_unless_allowed() {
        let store = test_store().await;
        let err = store
            .apply_transaction("t1", Credit::new(-50), TransactionType::UsageCharge, None, None, None, false)
            .await;
        assert!(matches!(err, Err(DbError::InsufficientCredits)));

        let ok = store
            .apply_transaction("t1", Credit::new(-50), TransactionType::UsageCharge, None, None, None, true)
            .await
            .unwrap();
        assert_eq!(ok.balance_after, Credit::new(-50));
    }

    #[tokio::test]
    async fn duplicate_reference_id_is_a_no_op_returning_existing() {
        let store = test_store().await;
        let first = store
            .apply_transaction(
                "t1",
                Credit::new(500),
                TransactionType::Purchase,
                None,
                Some("stripe:session:abc".into()),
                None,
                false,
            )
            .await
            .unwrap();

        let replay = store
            .apply_transaction(
                "t1",
                Credit::new(500),
                TransactionType::Purchase,
                None,
                Some("stripe:session:abc".into()),
                None,
                false,
            )
            .await
            .unwrap();

        assert_eq!(first.id, replay.id);
        assert_eq!(store.balance("t1").await.unwrap(), Credit::new(500)); // not double-applied
    }

    #[tokio::test]
    async fn history_orders_newest_first() {
        let store = test_store().await;
        store
            .apply_transaction("t1", Credit::new(100), TransactionType::Purchase, None, None, None, false)
            .await
            .unwrap();
        store
            .apply_transaction("t1", Credit::new(50), TransactionType::Purchase, None, None, None, false)
            .await
            .unwrap();

        let history = store.history("t1", 10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].balance_after, Credit::new(150));
        assert_eq!(history[1].balance_after, Credit::new(100));
    }
}
