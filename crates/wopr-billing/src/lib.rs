// [crates/wopr-billing/src/lib.rs]
//! Credit ledger, tenant lifecycle state machine, auto-topup engine, and
//! payment-webhook reconciliation.

pub mod autotopup;
pub mod errors;
pub mod ledger;
pub mod tenant_status;
pub mod webhook;

pub use autotopup::{
    compute_next_schedule_at, is_allowed_threshold, is_allowed_topup, AutoTopupEngine,
    PaymentCharger, ALLOWED_THRESHOLD_DOLLARS, ALLOWED_TOPUP_DOLLARS,
};
pub use errors::BillingError;
pub use ledger::CreditLedger;
pub use tenant_status::{CascadeResult, TenantStatusManager};
pub use webhook::{backoff_for_failures, verify_signature, CheckoutSessionEvent, HandleOutcome, WebhookReconciler};
