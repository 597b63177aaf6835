// [apps/control-plane/tests/scenarios.rs]
//! End-to-end scenario coverage driven through the real axum router via
//! `tower::ServiceExt::oneshot`, against an in-memory database and a
//! temp-dir profile store. Anything that would dial a real node agent
//! or payment processor over HTTPS is exercised at the library level
//! instead (see each crate's own `#[cfg(test)]` modules); these tests
//! cover the handler/router wiring itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use wopr_control_plane::config::Config;
use wopr_control_plane::routes;
use wopr_control_plane::state::AppState;
use wopr_db::repositories::{BotInstanceStore, NodeStore, RecoveryStore, SqlRecoveryStore};
use wopr_models::fleet::{RecoveryEvent, RecoveryStatus, RecoveryTrigger};

type HmacSha256 = Hmac<Sha256>;

const WEBHOOK_SECRET: &str = "whsec_test_secret";

async fn test_state() -> Arc<AppState> {
    let profile_dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        database_url: ":memory:".to_string(),
        database_token: None,
        bind_addr: "127.0.0.1:0".to_string(),
        profile_store_dir: profile_dir.path().to_string_lossy().to_string(),
        vault_secret: b"test-vault-secret-material".to_vec(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        command_bus_token: "dev-node-agent-token".to_string(),
        command_bus_timeout: std::time::Duration::from_secs(5),
        default_bot_image: "ghcr.io/wopr/bot-default:latest".to_string(),
        payment_processor_url: "https://api.stripe.com/v1/payment_intents".to_string(),
        payment_processor_api_key: "sk_test_dummy".to_string(),
        provider_base_urls: HashMap::new(),
    };
    // Leaked on purpose: the tempdir only needs to outlive the test, and
    // each test owns its own state, so a per-test leak is harmless.
    std::mem::forget(profile_dir);
    AppState::build(config).await.expect("building test app state")
}

fn sign(body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// `oneshot` skips the `into_make_service_with_connect_info` layer that
/// normally injects this extension, so it's inserted by hand here.
fn with_fake_peer(mut request: Request<Body>) -> Request<Body> {
    let addr: SocketAddr = "127.0.0.1:54321".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn webhook_request(body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = sign(&bytes);
    with_fake_peer(
        Request::builder()
            .method("POST")
            .uri("/webhooks/payments")
            .header("content-type", "application/json")
            .header("x-processor-signature", signature)
            .body(Body::from(bytes))
            .unwrap(),
    )
}

/// S1 (signup → balance → bot listing), minus the container dispatch:
/// a webhook credits the ledger, then the bot is seeded directly into
/// the repository/profile store (standing in for a successful
/// placement + `bot.import` ack) and the read endpoints are checked.
#[tokio::test]
async fn signup_to_balance_and_bot_listing() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    let event = json!({
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "sess_1",
                "customer": "cus_1",
                "client_reference_id": null,
                "amount_total": 500,
                "metadata": { "wopr_tenant": "u1" }
            }
        }
    });

    let response = app.clone().oneshot(webhook_request(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["credited_cents"], 500);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/v1/tenants/u1/balance").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["balance_credits"], 500);

    let now = chrono::Utc::now();
    let bot_id = uuid::Uuid::new_v4();
    state
        .bots
        .create(&wopr_models::bot::BotInstance {
            id: bot_id,
            tenant: "u1".to_string(),
            name: "b".to_string(),
            node_id: None,
            billing_state: wopr_models::bot::BillingState::Active,
            suspended_at: None,
            destroy_after: None,
            resource_tier: "standard".to_string(),
            storage_tier: "standard".to_string(),
            created_by_user_id: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/v1/tenants/u1/bots").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], bot_id.to_string());
}

/// Same checkout event delivered twice credits the ledger exactly once.
#[tokio::test]
async fn webhook_replay_is_idempotent() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    let event = json!({
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "sess_replay",
                "customer": "cus_1",
                "client_reference_id": null,
                "amount_total": 1500,
                "metadata": { "wopr_tenant": "u2" }
            }
        }
    });

    for _ in 0..3 {
        let response = app.clone().oneshot(webhook_request(&event)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let balance = state.ledger.balance("u2").await.unwrap();
    assert_eq!(balance.cents(), 1500);
}

/// An invalid signature is rejected and never touches the ledger.
#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    let event = json!({
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "sess_bad",
                "customer": "cus_1",
                "client_reference_id": null,
                "amount_total": 2500,
                "metadata": { "wopr_tenant": "u3" }
            }
        }
    });
    let bytes = serde_json::to_vec(&event).unwrap();
    let request = with_fake_peer(
        Request::builder()
            .method("POST")
            .uri("/webhooks/payments")
            .header("content-type", "application/json")
            .header("x-processor-signature", "deadbeef")
            .body(Body::from(bytes))
            .unwrap(),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.ledger.balance("u3").await.unwrap().cents(), 0);
}

/// S2 — suspend cascades to every bot on the tenant, then a second
/// suspend is rejected.
#[tokio::test]
async fn suspend_cascades_and_rejects_double_suspend() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    let now = chrono::Utc::now();
    for name in ["b1", "b2"] {
        state
            .bots
            .create(&wopr_models::bot::BotInstance {
                id: uuid::Uuid::new_v4(),
                tenant: "t1".to_string(),
                name: name.to_string(),
                node_id: Some("n1".to_string()),
                billing_state: wopr_models::bot::BillingState::Active,
                suspended_at: None,
                destroy_after: None,
                resource_tier: "standard".to_string(),
                storage_tier: "standard".to_string(),
                created_by_user_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/tenants/t1/suspend")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "reason": "review", "by": "ops" })).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["suspended_bot_ids"].as_array().unwrap().len(), 2);
    assert_eq!(state.bots.count_active_for_tenant("t1").await.unwrap(), 0);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/tenants/t1/suspend")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "reason": "review", "by": "ops" })).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

/// S3 — banning a tenant with a positive balance refunds it in full;
/// banning again with a zero balance refunds nothing.
#[tokio::test]
async fn ban_refunds_balance_once() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    state
        .ledger
        .credit("t2", wopr_core::Credit::new(5000), wopr_models::billing::TransactionType::SignupGrant, None, None, None)
        .await
        .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/tenants/t2/ban")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "reason": "fraud", "by": "ops" })).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["refunded_credits"], 5000);
    assert_eq!(state.ledger.balance("t2").await.unwrap().cents(), 0);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/tenants/t2/ban")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "reason": "fraud", "by": "ops" })).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

/// Node registration is reachable through the router and `findPlacement`
/// prefers the node with more free capacity.
#[tokio::test]
async fn node_registration_and_placement() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    for (id, capacity) in [("n1", 8192u64), ("n2", 4096u64)] {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/nodes")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "id": id,
                    "host": format!("{id}.internal:9000"),
                    "capacity_mb": capacity,
                    "agent_version": "1.0.0",
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(Request::builder().uri("/v1/nodes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let candidates = state.nodes.placement_candidates(100).await.unwrap();
    let chosen = wopr_fleet::find_placement(&candidates, 100).unwrap();
    assert_eq!(chosen.id, "n1");
}

/// S4: a node with a still-`in_progress` recovery event reconnects —
/// the event must be closed (`status=completed`) as part of
/// re-registration, and `offline -> returning` must itself be accepted.
#[tokio::test]
async fn re_registration_closes_in_progress_recovery_events() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    let register = |id: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/v1/nodes")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "id": id,
                    "host": format!("{id}.internal:9000"),
                    "capacity_mb": 4096u64,
                    "agent_version": "1.0.0",
                }))
                .unwrap(),
            ))
            .unwrap()
    };

    let response = app.clone().oneshot(register("dead1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    state.nodes.transition("dead1", wopr_models::fleet::NodeStatus::Unhealthy, "test", "test").await.unwrap();
    state.nodes.transition("dead1", wopr_models::fleet::NodeStatus::Offline, "test", "test").await.unwrap();

    let recovery_store = SqlRecoveryStore::new(state.db.clone());
    let event = RecoveryEvent {
        id: uuid::Uuid::new_v4(),
        node: "dead1".to_string(),
        trigger: RecoveryTrigger::HeartbeatTimeout,
        status: RecoveryStatus::InProgress,
        tenants_total: 1,
        tenants_recovered: 0,
        tenants_failed: 0,
        tenants_waiting: 1,
        started_at: chrono::Utc::now(),
        completed_at: None,
        report: String::new(),
    };
    recovery_store.create_event(&event).await.unwrap();

    // re-registering a node that's `offline` must itself succeed (it
    // used to be rejected as an invalid transition).
    let response = app.oneshot(register("dead1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let closed = recovery_store.get_event(event.id).await.unwrap();
    assert_eq!(closed.status, RecoveryStatus::Completed);
    assert!(closed.completed_at.is_some());
}

/// Admin manual credit always posts as a `Correction` transaction and
/// is reflected in both the balance and the history endpoints.
#[tokio::test]
async fn admin_credit_reflected_in_balance_and_history() {
    let state = test_state().await;
    let app = routes::build(state.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/tenants/t3/credit")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "amount_credits": 750, "reason": "goodwill" })).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/v1/tenants/t3/balance").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["balance_credits"], 750);

    let response = app
        .oneshot(Request::builder().uri("/v1/tenants/t3/history?limit=10").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["type"], "correction");
}
