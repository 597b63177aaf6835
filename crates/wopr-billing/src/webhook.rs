// [crates/wopr-billing/src/webhook.rs]
//! Webhook Reconciler (C18). Verifies payment-processor signatures,
//! throttles repeat signature failures per source IP, and applies
//! `checkout.session.completed` events to the credit ledger.

use crate::errors::BillingError;
use crate::ledger::CreditLedger;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use wopr_core::Credit;
use wopr_db::repositories::ledger::CreditLedgerStore;
use wopr_db::repositories::webhook::SqlWebhookSigPenaltyStore;
use wopr_models::billing::TransactionType;

type HmacSha256 = Hmac<Sha256>;

/// A parsed `checkout.session.completed` payload. Other event types are
/// accepted but ignored (`handled: false`).
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: CheckoutSessionData,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionData {
    pub object: CheckoutSession,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub customer: Option<String>,
    pub client_reference_id: Option<String>,
    pub amount_total: i64,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct HandleOutcome {
    pub handled: bool,
    pub tenant: Option<String>,
    pub credited_cents: Option<i64>,
}

/// Verifies an HMAC-SHA256 signature over the raw request body. The
/// header carries a hex-encoded digest; callers supply the shared
/// secret configured for the processor.
pub fn verify_signature(body: &[u8], signature_header: &str, secret: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);
    constant_time_eq(expected_hex.as_bytes(), signature_header.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Escalating backoff after repeated signature failures: `2^failures`
/// seconds, capped so a misbehaving source never locks out forever.
pub fn backoff_for_failures(failures: u32) -> Duration {
    Duration::seconds(2i64.saturating_pow(failures.min(10)))
}

pub struct WebhookReconciler<L> {
    penalties: Arc<SqlWebhookSigPenaltyStore>,
    ledger: CreditLedger<L>,
    secret: String,
}

impl<L> WebhookReconciler<L>
where
    L: CreditLedgerStore,
{
    pub fn new(penalties: Arc<SqlWebhookSigPenaltyStore>, ledger: CreditLedger<L>, secret: String) -> Self {
        Self { penalties, ledger, secret }
    }

    /// Verifies the signature, applying and recording per-IP backoff on
    /// failure. Returns `Ok(())` only if the signature is valid and the
    /// source isn't currently throttled.
    pub async fn authenticate(
        &self,
        source_ip: &str,
        body: &[u8],
        signature_header: &str,
    ) -> Result<(), BillingError> {
        let now = Utc::now();
        if self.penalties.is_backed_off(source_ip, now).await? {
            return Err(BillingError::Validation("source is backed off after repeated signature failures".into()));
        }

        if verify_signature(body, signature_header, &self.secret) {
            self.penalties.clear(source_ip).await?;
            Ok(())
        } else {
            self.penalties.record_failure(source_ip, now, backoff_for_failures).await?;
            Err(BillingError::Validation("invalid webhook signature".into()))
        }
    }

    pub async fn handle_checkout_completed(
        &self,
        event: &CheckoutSessionEvent,
    ) -> Result<HandleOutcome, BillingError> {
        if event.event_type != "checkout.session.completed" {
            return Ok(HandleOutcome { handled: false, tenant: None, credited_cents: None });
        }

        let session = &event.data.object;
        let tenant = session
            .metadata
            .get("wopr_tenant")
            .cloned()
            .or_else(|| session.client_reference_id.clone())
            .ok_or_else(|| BillingError::Validation("checkout session has no resolvable tenant".into()))?;

        let tx = self
            .ledger
            .credit(
                &tenant,
                Credit::new(session.amount_total),
                TransactionType::Purchase,
                Some(format!("stripe checkout {}", session.id)),
                Some(format!("stripe:session:{}", session.id)),
                session.customer.clone(),
            )
            .await?;

        Ok(HandleOutcome { handled: true, tenant: Some(tenant), credited_cents: Some(tx.amount.cents()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wopr_db::repositories::ledger::SqlCreditLedgerStore;
    use wopr_db::DbClient;

    async fn reconciler(secret: &str) -> WebhookReconciler<SqlCreditLedgerStore> {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let penalties = Arc::new(SqlWebhookSigPenaltyStore::new(db.clone()));
        let ledger = CreditLedger::new(Arc::new(SqlCreditLedgerStore::new(db)));
        WebhookReconciler::new(penalties, ledger, secret.to_string())
    }

    #[test]
    fn signature_roundtrips() {
        let secret = "whsec_test";
        let body = br#"{"type":"checkout.session.completed"}"#;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(body, &sig, secret));
        assert!(!verify_signature(body, "deadbeef", secret));
    }

    #[tokio::test]
    async fn single_bad_signature_does_not_back_off() {
        let r = reconciler("whsec_test").await;
        let body = b"{}";
        let sig = {
            let mut mac = HmacSha256::new_from_slice(b"whsec_test").unwrap();
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        };
        let _ = r.authenticate("9.9.9.9", body, "bad").await;
        // a single failure must not trip the backoff — a correct signature
        // right after should still authenticate.
        assert!(r.authenticate("9.9.9.9", body, &sig).await.is_ok());
    }

    #[tokio::test]
    async fn repeated_bad_signatures_trigger_backoff() {
        let r = reconciler("whsec_test").await;
        let body = b"{}";
        let sig = {
            let mut mac = HmacSha256::new_from_slice(b"whsec_test").unwrap();
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        };
        for _ in 0..5 {
            let _ = r.authenticate("9.9.9.9", body, "bad").await;
        }
        // the 5 failures above must not have tripped backoff yet either.
        assert!(r.authenticate("9.9.9.9", body, &sig).await.is_ok());

        for _ in 0..6 {
            let _ = r.authenticate("9.9.9.9", body, "bad").await;
        }
        // now backed off — even a correct signature is rejected.
        let err = r.authenticate("9.9.9.9", body, &sig).await;
        assert!(matches!(err, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn checkout_completed_credits_ledger_idempotently() {
        let r = reconciler("whsec_test").await;
        let event = CheckoutSessionEvent {
            event_type: "checkout.session.completed".into(),
            data: CheckoutSessionData {
                object: CheckoutSession {
                    id: "sess_1".into(),
                    customer: Some("cus_1".into()),
                    client_reference_id: Some("t1".into()),
                    amount_total: 2000,
                    metadata: Default::default(),
                },
            },
        };

        let first = r.handle_checkout_completed(&event).await.unwrap();
        assert!(first.handled);
        assert_eq!(first.credited_cents, Some(2000));

        let replay = r.handle_checkout_completed(&event).await.unwrap();
        assert_eq!(replay.credited_cents, Some(2000));
        assert_eq!(r.ledger.balance("t1").await.unwrap(), Credit::new(2000)); // not double-applied
    }
}
