// [apps/control-plane/src/routes.rs]
//! HTTP route table.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers::{admin, billing, bots, gateway, nodes, recovery, tenants, webhooks};
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/bots", post(bots::create_bot))
        .route("/v1/bots/:bot_id", get(bots::get_bot).delete(bots::remove_bot))
        .route("/v1/bots/:bot_id/stop", post(bots::stop_bot))
        .route("/v1/tenants/:tenant/bots", get(bots::list_bots_by_tenant))
        .route("/v1/tenants/:tenant/balance", get(billing::get_balance))
        .route("/v1/tenants/:tenant/history", get(billing::get_history))
        .route("/v1/tenants/:tenant/status", get(tenants::get_status))
        .route("/v1/admin/tenants/:tenant/credit", post(billing::admin_credit))
        .route("/v1/admin/tenants/:tenant/grace-period", post(tenants::set_grace_period))
        .route("/v1/admin/tenants/:tenant/suspend", post(tenants::suspend))
        .route("/v1/admin/tenants/:tenant/reactivate", post(tenants::reactivate))
        .route("/v1/admin/tenants/:tenant/ban", post(tenants::ban))
        .route("/v1/admin/api-keys", post(admin::issue_api_key))
        .route("/v1/admin/api-keys/:token", axum::routing::delete(admin::revoke_api_key))
        .route("/v1/admin/tenants/:tenant/credentials", post(admin::upsert_credential))
        .route("/webhooks/payments", post(webhooks::receive))
        .route("/v1/gateway/:provider/chat/completions", post(gateway::chat_completions))
        .route("/v1/nodes", get(nodes::list_nodes).post(nodes::register))
        .route("/v1/nodes/:node_id", get(nodes::get_node))
        .route("/v1/nodes/:node_id/heartbeat", post(nodes::heartbeat))
        .route("/v1/admin/nodes/:node_id/recover", post(recovery::trigger))
        .route("/v1/admin/recovery-events/:event_id/retry", post(recovery::retry))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
