//! Informational routes and the direct tool API.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::server::AppState;
use crate::tools::{ToolContext, ToolInvocationError, ToolOutcome};
use crate::types::{MCP_VERSION, SERVER_NAME, SERVER_VERSION};

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": SERVER_VERSION,
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

/// `GET /info`
pub async fn info(State(state): State<AppState>) -> Json<Value> {
    let categories: Vec<String> = state.registry.by_category().into_keys().collect();
    Json(json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "protocolVersion": MCP_VERSION,
        "transports": ["streamable-http", "sse"],
        "endpoints": {
            "streamable": "/mcp",
            "sse": "/sse",
            "messages": "/messages",
            "health": "/health",
            "tools": "/tools",
            "api": "/api/tool/:name",
        },
        "sessions": state.sessions.len(),
        "tools": {
            "count": state.registry.len(),
            "categories": categories,
        },
    }))
}

/// `GET /tools`
pub async fn tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "categories": state.registry.by_category(),
        "total": state.registry.len(),
    }))
}

fn failure(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
        .into_response()
}

/// `POST /api/tool/:name`: the body is the argument object; an empty body means `{}`.
pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let args = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(args) => args,
            Err(e) => return failure(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}")),
        }
    };

    match state
        .registry
        .invoke(&name, Some(args), ToolContext::default())
        .await
    {
        Ok(ToolOutcome::Success(value)) => (StatusCode::OK, Json(value)).into_response(),
        Ok(failed @ ToolOutcome::Failure(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(failed.into_payload()),
        )
            .into_response(),
        Err(e @ ToolInvocationError::NotFound(_)) => failure(StatusCode::NOT_FOUND, e),
        Err(e @ ToolInvocationError::InvalidInput { .. }) => failure(StatusCode::BAD_REQUEST, e),
    }
}
