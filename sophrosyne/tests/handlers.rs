use std::sync::Arc;

use serde_json::json;
use sophrosyne::app::App;
use sophrosyne::handlers;
use sophrosyne_core::config::from_yaml_str;
use sophrosyne_test::TestApp;
use sophrosyne_transport::{build_http_router, AuthState, HttpFrontConfig, RpcAppState};

async fn test_app() -> (TestApp, String) {
    let config = from_yaml_str(
        "server:\n  port: 0\nsecurity:\n  siteKey: \"test-site-key\"\n  salt: \"test-salt\"\n",
    )
    .unwrap();

    let (app, root_token) = App::build(config).await.unwrap();
    let root_token = root_token.expect("fresh store always bootstraps a root token");

    let mut rpc_router: sophrosyne_rpc::Router<sophrosyne::app::AppCtx> = sophrosyne_rpc::Router::new();
    handlers::register(&mut rpc_router);

    let rpc_app_state = Arc::new(RpcAppState {
        router: Arc::new(rpc_router),
        ctx_builder: app.ctx_builder(),
    });

    let auth_state = Arc::new(AuthState {
        store: app.users.clone(),
        site_key: app.site_key.as_ref().clone(),
        salt: app.salt.as_ref().clone(),
        bypass_prefixes: vec!["/healthz".to_string()],
    });

    let router = build_http_router(
        rpc_app_state,
        auth_state,
        app.health.clone(),
        app.panic_counter.clone(),
        HttpFrontConfig {
            body_limit_bytes: 1024 * 1024,
            request_timeout: std::time::Duration::from_secs(5),
        },
    );

    (TestApp::new(router), root_token)
}

#[tokio::test]
async fn unauthenticated_rpc_call_is_rejected() {
    let (app, _root_token) = test_app().await;
    let body = json!({"jsonrpc": "2.0", "method": "Checks::GetChecks", "id": 1});
    app.rpc(&body).await.assert_unauthorized();
}

#[tokio::test]
async fn root_can_create_and_fetch_a_check() {
    let (app, root_token) = test_app().await;

    let create = json!({
        "jsonrpc": "2.0",
        "method": "Checks::CreateCheck",
        "params": {"name": "profanity", "upstream_services": []},
        "id": 1,
    });
    let resp = app.rpc_authenticated(&create, &root_token).await.assert_ok();
    let value: serde_json::Value = resp.json();
    let check_id = value["result"]["id"].as_str().unwrap().to_string();

    let get = json!({
        "jsonrpc": "2.0",
        "method": "Checks::GetCheck",
        "params": {"id": check_id},
        "id": 2,
    });
    let resp = app.rpc_authenticated(&get, &root_token).await.assert_ok();
    let value: serde_json::Value = resp.json();
    assert_eq!(value["result"]["name"], "profanity");
}

#[tokio::test]
async fn non_admin_cannot_create_checks() {
    let (app, root_token) = test_app().await;

    let create_user = json!({
        "jsonrpc": "2.0",
        "method": "Users::CreateUser",
        "params": {"name": "normal", "email": "normal@example.com"},
        "id": 1,
    });
    let resp = app.rpc_authenticated(&create_user, &root_token).await.assert_ok();
    let value: serde_json::Value = resp.json();
    let normal_token = value["result"]["token"].as_str().unwrap().to_string();

    let create_check = json!({
        "jsonrpc": "2.0",
        "method": "Checks::CreateCheck",
        "params": {"name": "profanity", "upstream_services": []},
        "id": 2,
    });
    let resp = app.rpc_authenticated(&create_check, &normal_token).await.assert_ok();
    let value: serde_json::Value = resp.json();
    assert_eq!(value["error"]["code"], 12345);
}

#[tokio::test]
async fn non_admin_can_perform_a_scan() {
    let (app, root_token) = test_app().await;

    let create_user = json!({
        "jsonrpc": "2.0",
        "method": "Users::CreateUser",
        "params": {"name": "normal", "email": "normal2@example.com"},
        "id": 1,
    });
    let resp = app.rpc_authenticated(&create_user, &root_token).await.assert_ok();
    let value: serde_json::Value = resp.json();
    let normal_token = value["result"]["token"].as_str().unwrap().to_string();

    let scan = json!({
        "jsonrpc": "2.0",
        "method": "Scans::PerformScan",
        "params": {"text": "hello world"},
        "id": 2,
    });
    let resp = app.rpc_authenticated(&scan, &normal_token).await.assert_ok();
    let value: serde_json::Value = resp.json();
    // no checks configured on the default profile -> result folds to false
    // but the call itself must be authorized for a non-admin principal.
    assert_eq!(value["result"]["result"], false);
}
