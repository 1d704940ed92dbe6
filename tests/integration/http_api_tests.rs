//! Integration tests for the HTTP surface.
//!
//! Each test serves on an ephemeral port discovered by binding and releasing
//! a listener first.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use acp_bridge::config::{AgentPreset, BridgeConfig};
use acp_bridge::server::{serve, AppState};
use acp_bridge::transport::TransportFactory;

use super::test_helpers::{AgentScript, ScriptedAgentFactory};

const API_KEY: &str = "test-key";

fn test_config(api_key: Option<&str>) -> BridgeConfig {
    let mut config = BridgeConfig {
        api_key: api_key.map(str::to_owned),
        ..BridgeConfig::default()
    };
    config.presets.push(AgentPreset {
        id: "scripted".into(),
        name: "Scripted".into(),
        command: "scripted-acp".into(),
        args: Vec::new(),
    });
    config.oneshot.default_preset = "scripted".into();
    config
}

/// Serve `config` on an ephemeral port, returning the base URL.
async fn spawn_server(config: BridgeConfig) -> (String, CancellationToken) {
    spawn_server_with(
        config,
        AgentScript {
            reply: vec!["pong".into()],
            ..AgentScript::default()
        },
    )
    .await
}

async fn spawn_server_with(
    mut config: BridgeConfig,
    script: AgentScript,
) -> (String, CancellationToken) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    config.http_port = port;

    let factory: Arc<dyn TransportFactory> = Arc::new(ScriptedAgentFactory::new(script));
    let state = Arc::new(AppState::new(Arc::new(config), factory));
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    tokio::spawn(async move {
        let _ = serve(state, server_ct).await;
    });

    // Give the server a moment to bind.
    tokio::time::sleep(Duration::from_millis(200)).await;

    (format!("http://127.0.0.1:{port}"), ct)
}

async fn post_agent(base_url: &str, token: Option<&str>, body: &Value) -> (u16, Value) {
    let client = reqwest::Client::new();
    let mut request = client.post(format!("{base_url}/api/agent")).json(body);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let resp = request.send().await.expect("POST /api/agent");
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.expect("json body");
    (status, body)
}

// ── GET /health ──────────────────────────────────────────────

#[tokio::test]
async fn health_reports_transport_and_peers() {
    let (base_url, ct) = spawn_server(test_config(None)).await;

    let resp = reqwest::get(format!("{base_url}/health"))
        .await
        .expect("HTTP GET /health");

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(
        body,
        json!({
            "status": "ok",
            "transport": "scripted",
            "peers": { "connected": 0, "detached": 0 },
        })
    );
    ct.cancel();
}

// ── POST /api/agent ──────────────────────────────────────────

#[tokio::test]
async fn agent_api_requires_configured_key() {
    let (base_url, ct) = spawn_server(test_config(None)).await;

    let (status, body) = post_agent(&base_url, Some(API_KEY), &json!({ "prompt": "hi" })).await;

    assert_eq!(status, 503);
    assert_eq!(body, json!({ "error": "API key not configured" }));
    ct.cancel();
}

#[tokio::test]
async fn agent_api_rejects_bad_token() {
    let (base_url, ct) = spawn_server(test_config(Some(API_KEY))).await;

    let (missing, _) = post_agent(&base_url, None, &json!({ "prompt": "hi" })).await;
    let (wrong, body) = post_agent(&base_url, Some("nope"), &json!({ "prompt": "hi" })).await;

    assert_eq!(missing, 401);
    assert_eq!(wrong, 401);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
    ct.cancel();
}

#[tokio::test]
async fn agent_api_validates_body() {
    let (base_url, ct) = spawn_server(test_config(Some(API_KEY))).await;

    let (status, body) = post_agent(&base_url, Some(API_KEY), &json!({ "prompt": "  " })).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "prompt is required" }));

    let (status, body) = post_agent(
        &base_url,
        Some(API_KEY),
        &json!({ "prompt": "hi", "preset": "nonexistent" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Invalid preset: nonexistent" }));

    let resp = reqwest::Client::new()
        .post(format!("{base_url}/api/agent"))
        .bearer_auth(API_KEY)
        .body("{not json")
        .send()
        .await
        .expect("POST");
    assert_eq!(resp.status(), 400);
    ct.cancel();
}

#[tokio::test]
async fn agent_api_runs_prompt() {
    let (base_url, ct) = spawn_server(test_config(Some(API_KEY))).await;

    let (status, body) = post_agent(
        &base_url,
        Some(API_KEY),
        &json!({ "prompt": "ping", "cwd": "/tmp", "timeout": 5_000 }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["response"], "pong");
    assert_eq!(body["sessionId"], "s-1");
    assert_eq!(body["stopReason"], "end_turn");
    assert!(body.get("timedOut").is_none());
    ct.cancel();
}

#[tokio::test]
async fn agent_api_timeout_is_in_milliseconds() {
    let (base_url, ct) = spawn_server_with(
        test_config(Some(API_KEY)),
        AgentScript {
            reply: vec!["partial".into()],
            hang: true,
            ..AgentScript::default()
        },
    )
    .await;

    let started = std::time::Instant::now();
    let resp = reqwest::Client::new()
        .post(format!("{base_url}/api/agent"))
        .bearer_auth(API_KEY)
        .json(&json!({ "prompt": "ping", "timeout": 1_000 }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .expect("reply within the millisecond budget");

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["timedOut"], true);
    assert_eq!(body["response"], "partial");
    assert!(started.elapsed() < Duration::from_secs(5));
    ct.cancel();
}
