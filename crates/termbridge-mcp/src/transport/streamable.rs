//! Streamable HTTP transport on `/mcp`.
//!
//! POST carries client messages and returns the responses inline. GET opens
//! an optional SSE stream for server pushes. DELETE ends the session. The
//! session id travels in the `mcp-session-id` header and is minted by a
//! successful `initialize`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::protocol::ProtocolHandler;
use crate::server::AppState;
use crate::session::{SessionInfo, SessionStore, TransportKind};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::framing::parse_body;
use super::stream::{event_stream, EventStream, PushChannel, StreamGuard};
use super::{record_activity, ConnectionAdapter, ConnectionState, Delivery, StateCell};

pub const MCP_SESSION_ID: &str = "mcp-session-id";

pub struct StreamableConnection {
    session_id: String,
    handler: ProtocolHandler,
    state: StateCell,
    push: PushChannel,
}

impl StreamableConnection {
    pub fn new(session_id: String, registry: Arc<ToolRegistry>) -> Self {
        let context = ToolContext {
            session_id: Some(session_id.clone()),
        };
        Self {
            session_id,
            handler: ProtocolHandler::new(registry, context),
            state: StateCell::new(ConnectionState::Uninitialized),
            push: PushChannel::new(),
        }
    }
}

#[async_trait]
impl ConnectionAdapter for StreamableConnection {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Streamable
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn deliver(&self, messages: Vec<JsonRpcMessage>) -> McpResult<Delivery> {
        if self.state.get() == ConnectionState::Closed {
            return Err(McpError::UnknownSession(self.session_id.clone()));
        }

        let mut responses = Vec::new();
        for msg in messages {
            let initialize = msg.is_initialize();
            if let Some(response) = self.handler.handle_message(msg).await {
                if initialize && response.get("result").is_some() {
                    self.state.advance(ConnectionState::Active);
                }
                responses.push(response);
            }
        }
        Ok(Delivery::Inline(responses))
    }

    fn open_stream(
        self: Arc<Self>,
        _sessions: Arc<SessionStore>,
        heartbeat: Duration,
    ) -> McpResult<EventStream> {
        if self.state.get() == ConnectionState::Closed {
            return Err(McpError::UnknownSession(self.session_id.clone()));
        }
        let (generation, rx) = self.push.attach();
        let conn = self.clone();
        let guard = StreamGuard::new(move || conn.push.detach(generation));
        tracing::debug!("Session {} opened a push stream", self.session_id);
        Ok(event_stream(rx, None, heartbeat, guard))
    }

    fn close(&self) -> bool {
        if self.state.close() {
            self.push.close();
            true
        } else {
            false
        }
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn streamable_connection(
    sessions: &SessionStore,
    id: &str,
) -> Option<Arc<dyn ConnectionAdapter>> {
    sessions
        .connection(id)
        .filter(|conn| conn.kind() == TransportKind::Streamable)
}

fn respond(delivery: Delivery, batch: bool, session_id: &str) -> Response {
    let mut response = match delivery {
        Delivery::Inline(responses) if responses.is_empty() => StatusCode::ACCEPTED.into_response(),
        Delivery::Inline(responses) if batch => Json(Value::Array(responses)).into_response(),
        Delivery::Inline(mut responses) => Json(responses.remove(0)).into_response(),
        Delivery::Pushed(_) => StatusCode::ACCEPTED.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(MCP_SESSION_ID, value);
    }
    response
}

/// `POST /mcp`
pub async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (messages, batch) = match parse_body(&body) {
        Ok(parsed) => parsed,
        Err(e) => return e.into_response(),
    };

    if let Some(id) = session_header(&headers) {
        let Some(conn) = streamable_connection(&state.sessions, id) else {
            return McpError::BadRequest("No valid session ID provided".to_string())
                .into_response();
        };
        record_activity(&state.sessions, id, &messages);
        return match conn.deliver(messages).await {
            Ok(delivery) => respond(delivery, batch, id),
            Err(e) => e.into_response(),
        };
    }

    if !messages.iter().any(JsonRpcMessage::is_initialize) {
        return McpError::BadRequest("No valid session ID provided".to_string()).into_response();
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let conn = Arc::new(StreamableConnection::new(
        session_id.clone(),
        state.registry.clone(),
    ));
    let labels: Vec<String> = messages
        .iter()
        .filter_map(JsonRpcMessage::activity_label)
        .collect();

    let delivery = match conn.deliver(messages).await {
        Ok(delivery) => delivery,
        Err(e) => return e.into_response(),
    };

    if conn.state() != ConnectionState::Active {
        // Initialize failed: answer with its error and keep no session.
        let body = match delivery {
            Delivery::Inline(mut responses) if !responses.is_empty() => {
                if batch {
                    Value::Array(responses)
                } else {
                    responses.remove(0)
                }
            }
            _ => Value::Null,
        };
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let info = SessionInfo::new(session_id.clone(), TransportKind::Streamable, user_agent);
    if let Err(e) = state.sessions.insert(info, conn) {
        return e.into_response();
    }
    for label in labels {
        state.sessions.record_activity(&session_id, label);
    }
    tracing::info!("Streamable session {session_id} initialized");

    respond(delivery, batch, &session_id)
}

/// `GET /mcp`
pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(conn) = session_header(&headers).and_then(|id| streamable_connection(&state.sessions, id))
    else {
        return McpError::SessionRequired.into_response();
    };
    match conn.open_stream(state.sessions.clone(), state.heartbeat) {
        Ok(stream) => Sse::new(stream).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /mcp`
pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return McpError::BadRequest(format!("Missing {MCP_SESSION_ID} header")).into_response();
    };
    if streamable_connection(&state.sessions, id).is_none() {
        return McpError::SessionNotFound(id.to_string()).into_response();
    }
    match state.sessions.remove(id) {
        Some(conn) => {
            conn.close();
            tracing::info!("Streamable session {id} closed by client");
            StatusCode::OK.into_response()
        }
        None => McpError::SessionNotFound(id.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> JsonRpcMessage {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_activates_and_close_rejects() {
        let conn = StreamableConnection::new(
            "s".to_string(),
            Arc::new(ToolRegistry::builder().seal()),
        );
        assert_eq!(conn.state(), ConnectionState::Uninitialized);

        let delivery = conn
            .deliver(vec![message(json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "t", "version": "0"}
                }
            }))])
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::Inline(ref r) if r.len() == 1));
        assert_eq!(conn.state(), ConnectionState::Active);

        assert!(conn.close());
        assert!(!conn.close());
        let err = conn
            .deliver(vec![message(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))])
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_failed_initialize_stays_uninitialized() {
        let conn = StreamableConnection::new(
            "s".to_string(),
            Arc::new(ToolRegistry::builder().seal()),
        );
        conn.deliver(vec![message(
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
        )])
        .await
        .unwrap();
        assert_eq!(conn.state(), ConnectionState::Uninitialized);
    }
}
