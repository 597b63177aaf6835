// [crates/wopr-gateway/src/pipeline.rs]
//! Gateway Proxy (C14). Per-request pipeline: auth, tenant status gate,
//! spending cap, balance floor, circuit breaker, then — once the caller
//! has dispatched upstream and collected usage — metering. Steps 1-5
//! and 7 live here; the actual upstream HTTP call (step 6) belongs to
//! the transport layer and is driven by the `credential` this pipeline
//! resolves during preflight.

use crate::circuit::CircuitBreaker;
use crate::errors::GatewayError;
use crate::meter_aggregator::MeterAggregator;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use wopr_billing::{AutoTopupEngine, BillingError, CreditLedger, PaymentCharger};
use wopr_core::Credit;
use wopr_db::repositories::ledger::CreditLedgerStore;
use wopr_db::repositories::meter::MeterStore;
use wopr_db::repositories::tenant_status::TenantStatusStore;
use wopr_models::billing::TransactionType;
use wopr_models::gateway::MeterEvent;

/// Minimum balance a tenant must hold to dispatch a request — "one day
/// of runtime" per the platform's own pricing.
pub const BALANCE_FLOOR: Credit = Credit::new(17);

/// Resolves `{tenant, instanceId}` from a bearer token. Token layout is
/// an implementation detail of whatever issues keys to tenants; this
/// trait is the seam so the pipeline never has to know it.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> Result<AuthContext, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant: String,
    pub instance_id: String,
}

/// Resolves the provider credential a tenant has on file (BYOK or
/// platform-funded), decrypted and ready to attach to the upstream call.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, tenant: &str, provider: &str) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpendingCaps {
    pub daily_cap_usd: Option<f64>,
    pub monthly_cap_usd: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateCard {
    pub input_rate_usd_per_1k: f64,
    pub output_rate_usd_per_1k: f64,
    /// Margin expressed as a rational multiplier, e.g. 20% markup = (6, 5).
    pub margin_numerator: i64,
    pub margin_denominator: i64,
}

/// Usage reported by the upstream call, whether read from a single
/// non-streaming response or accumulated across an SSE stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// A provider-supplied cost figure, when present, takes precedence
    /// over token-rate computation (§4.14 step 7).
    pub cost_credits_header: Option<Credit>,
}

/// Accumulates usage across SSE chunks so exactly one meter event is
/// emitted regardless of how many chunks were seen, including on an
/// aborted stream (the accumulator at abort time is used as-is).
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamAccumulator {
    usage: UpstreamUsage,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate_tokens(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        self.usage.prompt_tokens = prompt_tokens;
        self.usage.completion_tokens = completion_tokens;
    }

    pub fn set_cost_header(&mut self, cost: Credit) {
        self.usage.cost_credits_header = Some(cost);
    }

    pub fn finish(self) -> UpstreamUsage {
        self.usage
    }
}

pub fn compute_cost(usage: &UpstreamUsage, rates: &RateCard) -> Credit {
    if let Some(cost) = usage.cost_credits_header {
        return cost;
    }
    let dollars = (usage.prompt_tokens as f64 * rates.input_rate_usd_per_1k
        + usage.completion_tokens as f64 * rates.output_rate_usd_per_1k)
        / 1000.0;
    Credit::from_dollars(dollars)
}

pub struct PreflightContext {
    pub tenant: String,
    pub instance_id: String,
    pub credential: String,
    pub circuit_key: String,
}

pub struct GatewayResponse {
    pub meter_event_id: Uuid,
    pub charge_credits: Credit,
}

pub struct GatewayPipeline<T, M, L, A, C, P> {
    statuses: Arc<T>,
    aggregator: MeterAggregator<M>,
    meters: Arc<M>,
    circuit: CircuitBreaker,
    ledger: CreditLedger<L>,
    auth: Arc<A>,
    credentials: Arc<C>,
    autotopup: Option<Arc<AutoTopupEngine<L, P>>>,
}

impl<T, M, L, A, C, P> GatewayPipeline<T, M, L, A, C, P>
where
    T: TenantStatusStore,
    M: MeterStore,
    L: CreditLedgerStore,
    A: AuthResolver,
    C: CredentialResolver,
    P: PaymentCharger,
{
    pub fn new(
        statuses: Arc<T>,
        aggregator: MeterAggregator<M>,
        meters: Arc<M>,
        circuit: CircuitBreaker,
        ledger: CreditLedger<L>,
        auth: Arc<A>,
        credentials: Arc<C>,
        autotopup: Option<Arc<AutoTopupEngine<L, P>>>,
    ) -> Self {
        Self { statuses, aggregator, meters, circuit, ledger, auth, credentials, autotopup }
    }

    /// Steps 1-5. Returns the context the caller needs to actually
    /// dispatch the upstream call (step 6), or the first failing
    /// pre-flight check.
    pub async fn preflight(
        &self,
        bearer_token: &str,
        provider: &str,
        caps: SpendingCaps,
    ) -> Result<PreflightContext, GatewayError> {
        let auth = self.auth.resolve(bearer_token).await?;

        let status = self.statuses.get(&auth.tenant).await?;
        use wopr_models::billing::TenantLifecycleStatus::*;
        match status.status {
            Active | GracePeriod => {}
            Suspended => return Err(GatewayError::AccountSuspended),
            Banned => return Err(GatewayError::AccountBanned),
        }

        if caps.daily_cap_usd.is_some() || caps.monthly_cap_usd.is_some() {
            let now = Utc::now();
            let spend = self.aggregator.query_spend(&auth.tenant, now).await?;
            if let Some(daily_cap) = caps.daily_cap_usd {
                let current = spend.daily_spend.to_dollars();
                if current >= daily_cap {
                    return Err(GatewayError::SpendingCapExceeded {
                        cap_type: "daily",
                        current_spend_usd: current,
                        cap_usd: daily_cap,
                    });
                }
            }
            if let Some(monthly_cap) = caps.monthly_cap_usd {
                let current = spend.monthly_spend.to_dollars();
                if current >= monthly_cap {
                    return Err(GatewayError::SpendingCapExceeded {
                        cap_type: "monthly",
                        current_spend_usd: current,
                        cap_usd: monthly_cap,
                    });
                }
            }
        }

        let balance = self.ledger.balance(&auth.tenant).await?;
        if balance < BALANCE_FLOOR {
            return Err(GatewayError::InsufficientBalance);
        }

        let circuit_key = auth.instance_id.clone();
        self.circuit.check(&circuit_key).await?;

        let credential = self.credentials.resolve(&auth.tenant, provider).await?;

        Ok(PreflightContext { tenant: auth.tenant, instance_id: auth.instance_id, credential, circuit_key })
    }

    /// Step 7. Computes the charge, debits the ledger, records the meter
    /// event, and (if configured) triggers usage-based auto-topup. Called
    /// exactly once per successfully dispatched request.
    pub async fn meter(
        &self,
        ctx: &PreflightContext,
        provider: &str,
        capability: &str,
        model: Option<&str>,
        usage: UpstreamUsage,
        rates: &RateCard,
    ) -> Result<GatewayResponse, GatewayError> {
        let cost = compute_cost(&usage, rates);
        let charge = cost.scale_rational(rates.margin_numerator, rates.margin_denominator);

        let event_id = Uuid::new_v4();
        let now = Utc::now();

        self.ledger
            .debit(
                &ctx.tenant,
                charge,
                TransactionType::UsageCharge,
                Some(format!("{capability} via {provider}")),
                Some(format!("meter:{event_id}")),
                true,
            )
            .await?;

        self.meters
            .record(&MeterEvent {
                id: event_id,
                tenant: ctx.tenant.clone(),
                cost_credits: cost,
                charge_credits: charge,
                capability: capability.to_string(),
                provider: provider.to_string(),
                instance_id: Some(ctx.instance_id.clone()),
                model: model.map(|m| m.to_string()),
                timestamp: now,
            })
            .await?;

        if let Some(autotopup) = &self.autotopup {
            if let Err(e) = autotopup.maybe_trigger_usage_topup(&ctx.tenant).await {
                tracing::warn!("usage auto-topup check failed for {}: {}", ctx.tenant, e);
            }
        }

        Ok(GatewayResponse { meter_event_id: event_id, charge_credits: charge })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wopr_db::repositories::ledger::SqlCreditLedgerStore;
    use wopr_db::repositories::meter::SqlMeterStore;
    use wopr_db::repositories::tenant_status::SqlTenantStatusStore;
    use wopr_db::DbClient;
    use std::time::Duration as StdDuration;

    struct FixedAuth;
    #[async_trait]
    impl AuthResolver for FixedAuth {
        async fn resolve(&self, bearer_token: &str) -> Result<AuthContext, GatewayError> {
            if bearer_token == "valid" {
                Ok(AuthContext { tenant: "t1".into(), instance_id: "inst-1".into() })
            } else {
                Err(GatewayError::AuthRequired)
            }
        }
    }

    struct FixedCredential;
    #[async_trait]
    impl CredentialResolver for FixedCredential {
        async fn resolve(&self, _tenant: &str, _provider: &str) -> Result<String, GatewayError> {
            Ok("sk-test".into())
        }
    }

    struct NeverCharges;
    #[async_trait]
    impl PaymentCharger for NeverCharges {
        async fn charge(&self, _pm: &str, _amount: Credit) -> Result<String, BillingError> {
            Err(BillingError::Validation("no processor wired in test".into()))
        }
    }

    type TestPipeline = GatewayPipeline<
        SqlTenantStatusStore,
        SqlMeterStore,
        SqlCreditLedgerStore,
        FixedAuth,
        FixedCredential,
        NeverCharges,
    >;

    async fn pipeline(db: &DbClient) -> TestPipeline {
        let statuses = Arc::new(SqlTenantStatusStore::new(db.clone()));
        let meters = Arc::new(SqlMeterStore::new(db.clone()));
        let aggregator = MeterAggregator::new(meters.clone(), StdDuration::ZERO);
        let circuit = CircuitBreaker::new(Arc::new(wopr_db::repositories::circuit::SqlCircuitStateStore::new(db.clone())));
        let ledger = CreditLedger::new(Arc::new(SqlCreditLedgerStore::new(db.clone())));
        GatewayPipeline::new(statuses, aggregator, meters, circuit, ledger, Arc::new(FixedAuth), Arc::new(FixedCredential), None)
    }

    #[tokio::test]
    async fn rejects_bad_token() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let p = pipeline(&db).await;
        let err = p.preflight("nope", "openai", SpendingCaps::default()).await;
        assert!(matches!(err, Err(GatewayError::AuthRequired)));
    }

    #[tokio::test]
    async fn rejects_balance_below_floor() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let p = pipeline(&db).await;
        let err = p.preflight("valid", "openai", SpendingCaps::default()).await;
        assert!(matches!(err, Err(GatewayError::InsufficientBalance)));
    }

    #[tokio::test]
    async fn preflight_passes_then_meters_exactly_once() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let p = pipeline(&db).await;
        p.ledger.credit("t1", Credit::from_dollars(10.0), TransactionType::SignupGrant, None, None, None).await.unwrap();

        let ctx = p.preflight("valid", "openai", SpendingCaps::default()).await.unwrap();
        assert_eq!(ctx.tenant, "t1");

        let rates = RateCard { input_rate_usd_per_1k: 1.0, output_rate_usd_per_1k: 2.0, margin_numerator: 6, margin_denominator: 5 };
        let usage = UpstreamUsage { prompt_tokens: 1000, completion_tokens: 500, cost_credits_header: None };
        let resp = p.meter(&ctx, "openai", "chat.completions", Some("gpt-test"), usage, &rates).await.unwrap();

        // cost = (1000*1.0 + 500*2.0)/1000 = 2.0 dollars = 200 credits; charge = 200 * 6/5 = 240
        assert_eq!(resp.charge_credits, Credit::new(240));

        let history = p.ledger.history("t1", 10, 0).await.unwrap();
        assert_eq!(history.iter().filter(|t| t.tx_type == TransactionType::UsageCharge).count(), 1);
    }

    #[tokio::test]
    async fn spending_cap_blocks_when_exceeded() {
        let db = DbClient::connect(":memory:", None).await.unwrap();
        let p = pipeline(&db).await;
        p.ledger.credit("t1", Credit::from_dollars(100.0), TransactionType::SignupGrant, None, None, None).await.unwrap();
        p.meters
            .record(&MeterEvent {
                id: Uuid::new_v4(),
                tenant: "t1".into(),
                cost_credits: Credit::from_dollars(55.50),
                charge_credits: Credit::from_dollars(55.50),
                capability: "chat.completions".into(),
                provider: "openai".into(),
                instance_id: None,
                model: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let caps = SpendingCaps { daily_cap_usd: Some(50.0), monthly_cap_usd: None };
        let err = p.preflight("valid", "openai", caps).await;
        assert!(matches!(err, Err(GatewayError::SpendingCapExceeded { cap_type: "daily", .. })));
    }
}
