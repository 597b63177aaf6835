// [apps/control-plane/src/state.rs]
//! Composition root. Every repository, manager, engine and pipeline in
//! the workspace is wired here, once, at startup, and handed to axum
//! as a single `Arc<AppState>`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use wopr_billing::{AutoTopupEngine, CreditLedger, TenantStatusManager, WebhookReconciler};
use wopr_command_bus::HttpCommandBus;
use wopr_db::repositories::{
    SqlApiKeyStore, SqlAutoTopupStore, SqlBotInstanceStore, SqlCircuitStateStore, SqlCredentialStore,
    SqlCreditLedgerStore, SqlMeterStore, SqlNodeStore, SqlRecoveryStore, SqlTenantStatusStore,
    SqlWebhookSigPenaltyStore,
};
use wopr_db::DbClient;
use wopr_fleet::{ConnectionManager, HeartbeatWatchdog, ImagePoller, ImageUpdater, OrphanCleaner, RecoveryOrchestrator};
use wopr_gateway::{CircuitBreaker, GatewayPipeline, MeterAggregator};
use wopr_observability::AlertChecker;
use wopr_profile_store::ProfileStore;

use crate::auth::{SqlAuthResolver, VaultCredentialResolver};
use crate::config::Config;
use crate::metrics::ControlPlaneMetrics;
use crate::payments::HttpPaymentCharger;
use crate::rate_lookup::{RateLookup, StaticRateLookup};
use crate::registry::HttpRegistryClient;
use crate::runtime::CommandBusFleetRuntime;
use wopr_observability::TracingAlertObserver;

pub type Runtime = CommandBusFleetRuntime<SqlBotInstanceStore, SqlNodeStore, HttpCommandBus>;
pub type Gateway = GatewayPipeline<
    SqlTenantStatusStore,
    SqlMeterStore,
    SqlCreditLedgerStore,
    SqlAuthResolver<SqlApiKeyStore>,
    VaultCredentialResolver<SqlCredentialStore>,
    HttpPaymentCharger,
>;

pub struct AppState {
    pub db: DbClient,
    pub config: Config,

    pub bots: Arc<SqlBotInstanceStore>,
    pub nodes: Arc<SqlNodeStore>,
    pub api_keys: Arc<SqlApiKeyStore>,
    pub credentials: Arc<SqlCredentialStore>,
    pub profiles: Arc<ProfileStore>,

    pub ledger: CreditLedger<SqlCreditLedgerStore>,
    pub tenant_status: Arc<TenantStatusManager<SqlTenantStatusStore, SqlBotInstanceStore, SqlCreditLedgerStore>>,
    pub autotopup: Arc<AutoTopupEngine<SqlCreditLedgerStore, HttpPaymentCharger>>,
    pub webhooks: Arc<WebhookReconciler<SqlCreditLedgerStore>>,

    pub command_bus: Arc<HttpCommandBus>,
    pub connection_manager: Arc<ConnectionManager<SqlNodeStore, SqlRecoveryStore>>,
    pub watchdog: Arc<HeartbeatWatchdog<SqlNodeStore>>,
    pub recovery: Arc<RecoveryOrchestrator<SqlNodeStore, SqlBotInstanceStore, SqlRecoveryStore, HttpCommandBus>>,
    pub orphan_cleaner: Arc<OrphanCleaner<SqlBotInstanceStore, SqlNodeStore, HttpCommandBus>>,
    pub image_poller: Arc<ImagePoller<HttpRegistryClient>>,
    pub image_updater: Arc<ImageUpdater<Runtime>>,
    pub fleet_runtime: Arc<Runtime>,

    pub gateway: Arc<Gateway>,
    pub rate_lookup: Arc<dyn RateLookup>,

    pub metrics: Arc<ControlPlaneMetrics>,
    pub alert_checker: Arc<AlertChecker<ControlPlaneMetrics, TracingAlertObserver>>,
}

impl AppState {
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let db = DbClient::connect(&config.database_url, config.database_token.clone())
            .await
            .context("connecting to control-plane database")?;

        let bots = Arc::new(SqlBotInstanceStore::new(db.clone()));
        let nodes = Arc::new(SqlNodeStore::new(db.clone()));
        let api_keys = Arc::new(SqlApiKeyStore::new(db.clone()));
        let credentials = Arc::new(SqlCredentialStore::new(db.clone()));
        let ledger_store = Arc::new(SqlCreditLedgerStore::new(db.clone()));
        let tenant_status_store = Arc::new(SqlTenantStatusStore::new(db.clone()));
        let recovery_store = Arc::new(SqlRecoveryStore::new(db.clone()));
        let meter_store = Arc::new(SqlMeterStore::new(db.clone()));
        let circuit_store = Arc::new(SqlCircuitStateStore::new(db.clone()));
        let autotopup_store = Arc::new(SqlAutoTopupStore::new(db.clone()));
        let webhook_penalty_store = Arc::new(SqlWebhookSigPenaltyStore::new(db.clone()));

        let profiles = Arc::new(ProfileStore::new(config.profile_store_dir.clone()));

        // `CreditLedger`/`CircuitBreaker`/`MeterAggregator` hold no state of
        // their own beyond an `Arc<Store>`, so each consumer gets its own
        // thin instance over the same shared store rather than a `Clone`
        // impl on the wrapper.
        let ledger = CreditLedger::new(ledger_store.clone());

        let tenant_status = Arc::new(TenantStatusManager::new(
            tenant_status_store.clone(),
            bots.clone(),
            CreditLedger::new(ledger_store.clone()),
        ));

        let payment_charger = Arc::new(HttpPaymentCharger::new(
            config.payment_processor_url.clone(),
            config.payment_processor_api_key.clone(),
        ));

        let autotopup = Arc::new(AutoTopupEngine::new(
            autotopup_store.clone(),
            CreditLedger::new(ledger_store.clone()),
            payment_charger.clone(),
        ));

        let webhooks = Arc::new(WebhookReconciler::new(
            webhook_penalty_store.clone(),
            CreditLedger::new(ledger_store.clone()),
            config.webhook_secret.clone(),
        ));

        let command_bus = Arc::new(HttpCommandBus::new(config.command_bus_token.clone(), config.command_bus_timeout));

        let orphan_cleaner = Arc::new(OrphanCleaner::new(bots.clone(), nodes.clone(), command_bus.clone()));
        let connection_manager =
            Arc::new(ConnectionManager::new(nodes.clone(), recovery_store.clone(), orphan_cleaner.clone()));

        let recovery = Arc::new(RecoveryOrchestrator::new(
            nodes.clone(),
            bots.clone(),
            recovery_store.clone(),
            command_bus.clone(),
            profiles.clone(),
        ));

        let watchdog = Arc::new(HeartbeatWatchdog::new(nodes.clone(), recovery.clone(), Default::default()));

        let registry_client = Arc::new(HttpRegistryClient::new());
        let image_poller = Arc::new(ImagePoller::new(registry_client));

        let fleet_runtime = Arc::new(CommandBusFleetRuntime::new(bots.clone(), nodes.clone(), command_bus.clone()));
        let image_updater = Arc::new(ImageUpdater::new(fleet_runtime.clone()));

        let auth_resolver = Arc::new(SqlAuthResolver::new(api_keys.clone()));
        let credential_resolver =
            Arc::new(VaultCredentialResolver::new(credentials.clone(), config.vault_secret.clone()));

        let gateway = Arc::new(GatewayPipeline::new(
            tenant_status_store.clone(),
            MeterAggregator::new(meter_store.clone(), StdDuration::from_secs(30)),
            meter_store.clone(),
            CircuitBreaker::new(circuit_store.clone()),
            CreditLedger::new(ledger_store.clone()),
            auth_resolver,
            credential_resolver,
            Some(autotopup.clone()),
        ));

        // Conservative fallback rate for any provider/model without an
        // explicit override; real pricing is registered via `with_override`
        // once providers are onboarded.
        let rate_lookup: Arc<dyn RateLookup> = Arc::new(StaticRateLookup::new(wopr_gateway::RateCard {
            input_rate_usd_per_1k: 0.15,
            output_rate_usd_per_1k: 0.60,
            margin_numerator: 6,
            margin_denominator: 5,
        }));

        let metrics = Arc::new(ControlPlaneMetrics::new());
        let alert_checker = Arc::new(AlertChecker::new(metrics.clone(), Arc::new(TracingAlertObserver)));

        Ok(Arc::new(Self {
            db,
            config,
            bots,
            nodes,
            api_keys,
            credentials,
            profiles,
            ledger,
            tenant_status,
            autotopup,
            webhooks,
            command_bus,
            connection_manager,
            watchdog,
            recovery,
            orphan_cleaner,
            image_poller,
            image_updater,
            fleet_runtime,
            gateway,
            rate_lookup,
            metrics,
            alert_checker,
        }))
    }
}
