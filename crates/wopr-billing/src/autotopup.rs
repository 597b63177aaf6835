// [crates/wopr-billing/src/autotopup.rs]
//! Auto-topup Engine (C17). Two independent paths sharing one settings
//! row per tenant: usage-triggered (fired from the gateway's debit
//! path) and scheduled (driven by a timer in the app layer).

use crate::errors::BillingError;
use crate::ledger::CreditLedger;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use wopr_core::{time, Credit};
use wopr_db::repositories::autotopup::SqlAutoTopupStore;
use wopr_db::repositories::ledger::CreditLedgerStore;
use wopr_models::billing::{AutoTopupInterval, AutoTopupSettings, TransactionType};

/// Allowed top-up amounts, in whole dollars.
pub const ALLOWED_TOPUP_DOLLARS: &[u32] = &[5, 10, 20, 50, 100, 200, 500];
/// Allowed usage-threshold amounts, in whole dollars.
pub const ALLOWED_THRESHOLD_DOLLARS: &[u32] = &[2, 5, 10];

pub fn is_allowed_topup(amount: Credit) -> bool {
    ALLOWED_TOPUP_DOLLARS.iter().any(|d| Credit::from_dollars(*d as f64) == amount)
}

pub fn is_allowed_threshold(amount: Credit) -> bool {
    ALLOWED_THRESHOLD_DOLLARS.iter().any(|d| Credit::from_dollars(*d as f64) == amount)
}

/// Next UTC midnight boundary for the given interval, always strictly
/// after `now`.
pub fn compute_next_schedule_at(interval: AutoTopupInterval, now: DateTime<Utc>) -> DateTime<Utc> {
    match interval {
        AutoTopupInterval::Daily => time::next_midnight(now),
        AutoTopupInterval::Weekly => time::next_monday(now),
        AutoTopupInterval::Monthly => time::next_month_start(now),
    }
}

/// Charges the tenant's stored payment method. The real implementation
/// is a payment-processor client injected at the app layer; this trait
/// is the seam so the engine's retry/backoff logic is unit-testable
/// without a live processor.
#[async_trait::async_trait]
pub trait PaymentCharger: Send + Sync {
    async fn charge(&self, payment_method_ref: &str, amount: Credit) -> Result<String, BillingError>;
}

pub struct AutoTopupEngine<L, P> {
    settings: Arc<SqlAutoTopupStore>,
    ledger: CreditLedger<L>,
    charger: Arc<P>,
}

impl<L, P> AutoTopupEngine<L, P>
where
    L: CreditLedgerStore,
    P: PaymentCharger,
{
    pub fn new(settings: Arc<SqlAutoTopupStore>, ledger: CreditLedger<L>, charger: Arc<P>) -> Self {
        Self { settings, ledger, charger }
    }

    /// Called after a debit lands the tenant's balance below
    /// `usage_threshold`. A no-op if usage top-up isn't enabled, the
    /// settings row is missing, or another charge is already in flight.
    pub async fn maybe_trigger_usage_topup(&self, tenant: &str) -> Result<(), BillingError> {
        let Some(settings) = self.settings.get(tenant).await? else { return Ok(()) };
        if !settings.usage_enabled {
            return Ok(());
        }

        let balance = self.ledger.balance(tenant).await?;
        if balance >= settings.usage_threshold {
            return Ok(());
        }

        if !self.settings.try_acquire_usage_lock(tenant).await? {
            return Ok(());
        }

        let outcome = self.charge_and_credit(tenant, &settings, settings.usage_topup).await;
        match outcome {
            Ok(()) => {
                self.settings.release_usage_lock(tenant, true).await?;
            }
            Err(e) => {
                tracing::warn!("usage auto-topup failed for {}: {}", tenant, e);
                self.settings.release_usage_lock(tenant, false).await?;
                let reloaded = self.settings.get(tenant).await?;
                if reloaded.map(|s| s.usage_consecutive_failures).unwrap_or(0) >= 3 {
                    self.disable_usage_topup(tenant).await?;
                }
            }
        }
        Ok(())
    }

    async fn charge_and_credit(
        &self,
        tenant: &str,
        settings: &AutoTopupSettings,
        amount: Credit,
    ) -> Result<(), BillingError> {
        let payment_method_ref = settings
            .payment_method_ref
            .as_deref()
            .ok_or_else(|| BillingError::Validation("no payment method on file".into()))?;
        self.charger.charge(payment_method_ref, amount).await?;

        let now = Utc::now();
        self.ledger
            .credit(
                tenant,
                amount,
                TransactionType::AutoTopup,
                Some("auto-topup".into()),
                Some(format!("autotopup:usage:{tenant}:{}", now.timestamp())),
                settings.payment_method_ref.clone(),
            )
            .await?;
        Ok(())
    }

    async fn disable_usage_topup(&self, tenant: &str) -> Result<(), BillingError> {
        if let Some(mut settings) = self.settings.get(tenant).await? {
            settings.usage_enabled = false;
            self.settings.upsert(&settings).await?;
            tracing::warn!("usage auto-topup disabled for {} after 3 consecutive failures", tenant);
        }
        Ok(())
    }

    /// Runs one pass of the scheduled path: charges every tenant whose
    /// `schedule_next_at` has arrived. `schedule_next_at` always
    /// advances regardless of charge outcome so a failing tenant never
    /// stalls the schedule.
    pub async fn run_scheduled_pass(&self, as_of: DateTime<Utc>) -> Result<usize, BillingError> {
        let due = self.settings.due_for_scheduled_topup(as_of).await?;
        for settings in &due {
            if !settings.schedule_enabled {
                continue;
            }
            let outcome = self.charge_and_credit(&settings.tenant, settings, settings.schedule_amount).await;

            let next_at = compute_next_schedule_at(settings.schedule_interval, as_of);
            self.settings.set_schedule_next_at(&settings.tenant, next_at).await?;

            match outcome {
                Ok(()) => {
                    if settings.schedule_consecutive_failures > 0 {
                        let mut reset = settings.clone();
                        reset.schedule_consecutive_failures = 0;
                        self.settings.upsert(&reset).await?;
                    }
                }
                Err(e) => {
                    tracing::warn!("scheduled auto-topup failed for {}: {}", settings.tenant, e);
                    let mut updated = settings.clone();
                    updated.schedule_consecutive_failures += 1;
                    if updated.schedule_consecutive_failures >= 3 {
                        updated.schedule_enabled = false;
                        tracing::warn!(
                            "scheduled auto-topup disabled for {} after 3 consecutive failures",
                            settings.tenant
                        );
                    }
                    self.settings.upsert(&updated).await?;
                }
            }
        }
        Ok(due.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wopr_db::repositories::ledger::SqlCreditLedgerStore;
    use wopr_db::DbClient;

    struct AlwaysSucceeds;
    #[async_trait::async_trait]
    impl PaymentCharger for AlwaysSucceeds {
        async fn charge(&self, _payment_method_ref: &str, _amount: Credit) -> Result<String, BillingError> {
            Ok("ch_ok".into())
        }
    }

    struct AlwaysFails;
    #[async_trait::async_trait]
    impl PaymentCharger for AlwaysFails {
        async fn charge(&self, _payment_method_ref: &str, _amount: Credit) -> Result<String, BillingError> {
            Err(BillingError::Validation("card declined".into()))
        }
    }

    fn sample(tenant: &str) -> AutoTopupSettings {
        AutoTopupSettings {
            tenant: tenant.into(),
            usage_enabled: true,
            usage_threshold: Credit::from_dollars(5.0),
            usage_topup: Credit::from_dollars(20.0),
            usage_charge_in_flight: false,
            usage_consecutive_failures: 0,
            schedule_enabled: true,
            schedule_amount: Credit::from_dollars(10.0),
            schedule_interval: AutoTopupInterval::Monthly,
            schedule_next_at: Some(Utc::now()),
            schedule_consecutive_failures: 0,
            payment_method_ref: Some("pm_1".into()),
        }
    }

    #[tokio::test]
    async fn allowed_value_closed_sets() {
        assert!(is_allowed_topup(Credit::from_dollars(20.0)));
        assert!(!is_allowed_topup(Credit::from_dollars(15.0)));
        assert!(is_allowed_threshold(Credit::from_dollars(5.0)));
        assert!(!is_allowed_threshold(Credit::from_dollars(3.0)));
    }

    #[tokio::test]
    async fn usage_topup_fires_below_threshold() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let settings = Arc::new(SqlAutoTopupStore::new(db.clone()));
        settings.upsert(&sample("t1")).await.unwrap();
        let ledger = CreditLedger::new(Arc::new(SqlCreditLedgerStore::new(db.clone())));
        ledger.credit("t1", Credit::from_dollars(1.0), TransactionType::SignupGrant, None, None, None).await.unwrap();

        let engine = AutoTopupEngine::new(settings.clone(), ledger, Arc::new(AlwaysSucceeds));
        engine.maybe_trigger_usage_topup("t1").await.unwrap();

        let balance = engine.ledger.balance("t1").await.unwrap();
        assert_eq!(balance, Credit::from_dollars(21.0));
        let reloaded = settings.get("t1").await.unwrap().unwrap();
        assert!(!reloaded.usage_charge_in_flight);
    }

    #[tokio::test]
    async fn three_failures_disables_usage_topup() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let settings = Arc::new(SqlAutoTopupStore::new(db.clone()));
        settings.upsert(&sample("t1")).await.unwrap();
        let ledger = CreditLedger::new(Arc::new(SqlCreditLedgerStore::new(db.clone())));

        let engine = AutoTopupEngine::new(settings.clone(), ledger, Arc::new(AlwaysFails));
        for _ in 0..3 {
            engine.maybe_trigger_usage_topup("t1").await.unwrap();
        }

        let reloaded = settings.get("t1").await.unwrap().unwrap();
        assert!(!reloaded.usage_enabled);
        assert_eq!(reloaded.usage_consecutive_failures, 3);
    }

    #[tokio::test]
    async fn scheduled_pass_advances_next_at_regardless_of_outcome() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let settings = Arc::new(SqlAutoTopupStore::new(db.clone()));
        settings.upsert(&sample("t1")).await.unwrap();
        let ledger = CreditLedger::new(Arc::new(SqlCreditLedgerStore::new(db.clone())));

        let engine = AutoTopupEngine::new(settings.clone(), ledger, Arc::new(AlwaysFails));
        let now = Utc::now();
        let processed = engine.run_scheduled_pass(now).await.unwrap();
        assert_eq!(processed, 1);

        let reloaded = settings.get("t1").await.unwrap().unwrap();
        assert!(reloaded.schedule_next_at.unwrap() > now);
        assert_eq!(reloaded.schedule_consecutive_failures, 1);
    }

    #[test]
    fn next_schedule_matches_interval_semantics() {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 14, 0, 0).unwrap();
        assert_eq!(
            compute_next_schedule_at(AutoTopupInterval::Daily, now),
            Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap()
        );
    }
}
