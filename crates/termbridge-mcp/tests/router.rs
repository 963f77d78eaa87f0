//! Router-level tests driven through `tower::ServiceExt::oneshot`, no socket involved.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use termbridge_mcp::types::McpError;
use termbridge_mcp::{router, AppState, Tool, ToolRegistry};

// ─────────────────────── helpers ───────────────────────

fn app() -> (Router, AppState) {
    let mut builder = ToolRegistry::builder();
    builder
        .register(Tool::new(
            "echo",
            "Echo the arguments back",
            "debug",
            json!({ "x": { "type": "integer", "optional": true } }),
            |args, _| async move { Ok(args) },
        ))
        .unwrap()
        .register(Tool::new(
            "explode",
            "Always fails",
            "debug",
            json!({}),
            |_, _| async { Err::<Value, _>(McpError::Bridge("nothing to see".into())) },
        ))
        .unwrap();
    let state = AppState::new(Arc::new(builder.seal()), Duration::from_secs(15));
    (router(state.clone()), state)
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ─────────────────────── informational routes ───────────────────────

#[tokio::test]
async fn test_health_info_tools() {
    let (app, _) = app();

    let (status, health) = call(app.clone(), Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert!(health["uptime"].is_u64());

    let (_, info) = call(app.clone(), Request::get("/info").body(Body::empty()).unwrap()).await;
    assert_eq!(info["protocolVersion"], "2024-11-05");
    assert_eq!(info["tools"]["count"], 2);
    assert_eq!(info["endpoints"]["streamable"], "/mcp");

    let (_, tools) = call(app, Request::get("/tools").body(Body::empty()).unwrap()).await;
    assert_eq!(tools["total"], 2);
    assert_eq!(tools["categories"]["debug"], json!(["echo", "explode"]));
}

// ─────────────────────── direct tool API ───────────────────────

#[tokio::test]
async fn test_direct_tool_api() {
    let (app, _) = app();

    let (status, body) = call(app.clone(), post("/api/tool/echo", r#"{"x": 3}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"x": 3}));

    let (status, body) = call(app.clone(), post("/api/tool/echo", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body) = call(app.clone(), post("/api/tool/missing", "{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, body) = call(app.clone(), post("/api/tool/explode", "{}")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"success": false, "error": "nothing to see"}));

    let (status, _) = call(app, post("/api/tool/echo", r#"{"x": "three"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─────────────────────── origin policy ───────────────────────

#[tokio::test]
async fn test_foreign_origin_is_forbidden_before_session_logic() {
    let (app, state) = app();
    let request = Request::post("/mcp")
        .header(header::ORIGIN, "http://evil.example")
        .header(header::HOST, "127.0.0.1:3001")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {
                "protocolVersion": "2024-11-05", "capabilities": {},
                "clientInfo": {"name": "t", "version": "0"}
            }})
            .to_string(),
        ))
        .unwrap();
    let (status, body) = call(app.clone(), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], -32000);
    assert!(state.sessions.is_empty());

    let request = Request::post("/api/tool/echo")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = call(app.clone(), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Informational routes are not guarded.
    let request = Request::get("/health")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_matching_host_origin_is_accepted() {
    let (app, _) = app();
    let request = Request::post("/api/tool/echo")
        .header(header::ORIGIN, "https://bridge.lan:8443")
        .header(header::HOST, "bridge.lan:8443")
        .body(Body::from(r#"{"x": 1}"#))
        .unwrap();
    let (status, _) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);
}

// ─────────────────────── session errors ───────────────────────

#[tokio::test]
async fn test_streamable_session_errors() {
    let (app, _) = app();

    let (status, body) = call(
        app.clone(),
        post("/mcp", r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32000);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No valid session ID"));

    let request = Request::post("/mcp")
        .header("mcp-session-id", "not-a-session")
        .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .unwrap();
    let (status, _) = call(app.clone(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(app.clone(), post("/mcp", "{oops")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32700);

    let (status, body) = call(
        app.clone(),
        post("/mcp", r#"{"jsonrpc":"2.0","id":2.5,"method":"ping"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32600);

    let (status, _) = call(app.clone(), Request::get("/mcp").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        app.clone(),
        Request::delete("/mcp").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::delete("/mcp")
        .header("mcp-session-id", "not-a-session")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_initialize_creates_no_session() {
    let (app, state) = app();
    let (status, body) = call(
        app,
        post("/mcp", r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32602);
    assert!(state.sessions.is_empty());
}

// ─────────────────────── legacy SSE routing ───────────────────────

#[tokio::test]
async fn test_legacy_routes() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(Request::post("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/mcp");

    let (status, _) = call(app.clone(), post("/messages", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        app,
        post(
            "/messages?sessionId=ghost",
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
