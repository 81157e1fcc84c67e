//! HTTP surface tests: auth, decision endpoints, error bodies, rate limits.
//!
//! The router is served on an ephemeral port and exercised with a real HTTP
//! client, token and all.

mod common;

use common::{harness, signal, Harness};
use rust_decimal_macros::dec;
use std::sync::Arc;

use hitl_gateway::api::{router, ApiState};
use hitl_gateway::auth::JwtHandler;
use hitl_gateway::middleware::{DecisionRateLimiter, RateLimitConfig};

const JWT_SECRET: &str = "test-secret-test-secret-test-secret";

struct Server {
    base_url: String,
    jwt: Arc<JwtHandler>,
    _harness: Harness,
}

async fn serve(h: Harness) -> Server {
    let jwt = Arc::new(JwtHandler::new(JWT_SECRET.to_string()));
    let app = router(ApiState {
        gateway: h.gateway.clone(),
        jwt: jwt.clone(),
        limiter: DecisionRateLimiter::new(RateLimitConfig::default()),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Server {
        base_url: format!("http://{addr}"),
        jwt,
        _harness: h,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn requests_without_token_are_401_sec_001() {
    let server = serve(harness()).await;

    let response = client()
        .get(format!("{}/api/hitl/pending", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "SEC-001");
    assert!(body["correlation_id"].is_string());
}

#[tokio::test]
async fn pending_list_includes_seconds_remaining() {
    let h = harness();
    h.gateway.create(signal("H1")).await.unwrap();
    let server = serve(h).await;
    let token = server.jwt.generate_token("alice").unwrap();

    let response = client()
        .get(format!("{}/api/hitl/pending", server.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    let approvals = body["approvals"].as_array().unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0]["trade_id"], "H1");
    let remaining = approvals[0]["seconds_remaining"].as_i64().unwrap();
    assert!(remaining > 0 && remaining <= 300);
    assert!(body["correlation_id"].is_string());
}

#[tokio::test]
async fn approve_endpoint_decides_the_trade() {
    let h = harness();
    h.gateway.create(signal("H2")).await.unwrap();
    h.market.set_quote("BTCZAR", dec!(1500000), dec!(1500000));
    let server = serve(h).await;
    let token = server.jwt.generate_token("alice").unwrap();

    let response = client()
        .post(format!("{}/api/hitl/H2/approve", server.base_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "approved_by": "alice",
            "channel": "WEB",
            "comment": "entry confirmed",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["approval"]["status"], "ACCEPTED");
    assert_eq!(body["approval"]["decided_by"], "alice");
}

#[tokio::test]
async fn reject_endpoint_requires_reason_and_decides() {
    let h = harness();
    h.gateway.create(signal("H3")).await.unwrap();
    h.market.set_quote("BTCZAR", dec!(1500000), dec!(1500000));
    let server = serve(h).await;
    let token = server.jwt.generate_token("bob").unwrap();

    let response = client()
        .post(format!("{}/api/hitl/H3/reject", server.base_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "rejected_by": "bob",
            "channel": "WEB",
            "reason": "stale setup",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["approval"]["status"], "REJECTED");
    assert_eq!(body["approval"]["decision_reason"], "stale setup");
}

#[tokio::test]
async fn unauthorized_operator_is_403_sec_090() {
    let h = harness();
    h.gateway.create(signal("H4")).await.unwrap();
    let server = serve(h).await;
    // The token is valid but mallory is not in HITL_ALLOWED_OPERATORS.
    let token = server.jwt.generate_token("mallory").unwrap();

    let response = client()
        .post(format!("{}/api/hitl/H4/approve", server.base_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "approved_by": "mallory",
            "channel": "WEB",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "SEC-090");
}

#[tokio::test]
async fn operator_mismatch_is_rejected() {
    let h = harness();
    h.gateway.create(signal("H5")).await.unwrap();
    let server = serve(h).await;
    let token = server.jwt.generate_token("alice").unwrap();

    let response = client()
        .post(format!("{}/api/hitl/H5/approve", server.base_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "approved_by": "bob",
            "channel": "WEB",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "SEC-010");
}

#[tokio::test]
async fn double_submit_is_rate_limited() {
    let h = harness();
    h.gateway.create(signal("H6")).await.unwrap();
    let server = serve(h).await;
    let token = server.jwt.generate_token("alice").unwrap();
    let body = serde_json::json!({
        "approved_by": "alice",
        "channel": "WEB",
    });

    // First attempt consumes the (operator, trade) budget regardless of its
    // own outcome (no market data here, so it fails closed).
    let first = client()
        .post(format!("{}/api/hitl/H6/approve", server.base_url))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 409);

    let second = client()
        .post(format!("{}/api/hitl/H6/approve", server.base_url))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 429);
    assert!(second.headers().contains_key("Retry-After"));
}

#[tokio::test]
async fn unknown_trade_is_404() {
    let server = serve(harness()).await;
    let token = server.jwt.generate_token("alice").unwrap();

    let response = client()
        .post(format!("{}/api/hitl/NOPE/approve", server.base_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "approved_by": "alice",
            "channel": "WEB",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn deeplink_resolves_once() {
    let h = harness();
    h.gateway.create(signal("H7")).await.unwrap();
    let minted = h
        .gateway
        .tokens()
        .mint("H7", chrono::Duration::seconds(300), "corr-H7", chrono::Utc::now())
        .await
        .unwrap();
    let server = serve(h).await;
    let token = server.jwt.generate_token("alice").unwrap();

    let response = client()
        .get(format!(
            "{}/api/hitl/deeplink/{}",
            server.base_url, minted.token
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["approval"]["trade_id"], "H7");

    // Second click: consumed.
    let response = client()
        .get(format!(
            "{}/api/hitl/deeplink/{}",
            server.base_url, minted.token
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "SEC-030");
}

#[tokio::test]
async fn health_and_metrics_are_open() {
    let h = harness();
    h.gateway.create(signal("H8")).await.unwrap();
    let server = serve(h).await;

    let response = client()
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client()
        .get(format!("{}/metrics", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();
    assert!(text.contains("hitl_requests_total 1"));
}
