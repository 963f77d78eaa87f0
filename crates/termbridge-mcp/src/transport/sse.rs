//! Legacy HTTP+SSE transport: `GET /sse` opens the stream, `POST /messages` sends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Redirect, Response};

use crate::protocol::ProtocolHandler;
use crate::server::AppState;
use crate::session::{SessionInfo, SessionStore, TransportKind};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{JsonRpcMessage, McpError, McpResult, MessagesQuery};

use super::framing::parse_body;
use super::stream::{event_stream, EventStream, PushChannel, StreamGuard};
use super::{record_activity, ConnectionAdapter, ConnectionState, Delivery, StateCell};

pub struct LegacySseConnection {
    session_id: String,
    handler: ProtocolHandler,
    state: StateCell,
    push: PushChannel,
}

impl LegacySseConnection {
    pub fn new(session_id: String, registry: Arc<ToolRegistry>) -> Self {
        let context = ToolContext {
            session_id: Some(session_id.clone()),
        };
        Self {
            session_id,
            handler: ProtocolHandler::new(registry, context),
            state: StateCell::new(ConnectionState::Connecting),
            push: PushChannel::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("/messages?sessionId={}", self.session_id)
    }
}

#[async_trait]
impl ConnectionAdapter for LegacySseConnection {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::LegacySse
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Responses go out on the event stream, never in the POST body.
    async fn deliver(&self, messages: Vec<JsonRpcMessage>) -> McpResult<Delivery> {
        if self.state.get() != ConnectionState::Active {
            return Err(McpError::UnknownSession(self.session_id.clone()));
        }
        let mut pushed = 0;
        for msg in messages {
            if let Some(response) = self.handler.handle_message(msg).await {
                self.push.send(response)?;
                pushed += 1;
            }
        }
        Ok(Delivery::Pushed(pushed))
    }

    /// The stream can be opened once. Dropping it removes the session.
    fn open_stream(
        self: Arc<Self>,
        sessions: Arc<SessionStore>,
        heartbeat: Duration,
    ) -> McpResult<EventStream> {
        if self.state.get() != ConnectionState::Connecting {
            return Err(McpError::Transport(format!(
                "Stream already opened for session {}",
                self.session_id
            )));
        }
        let (_, rx) = self.push.attach();
        self.state.advance(ConnectionState::Active);

        let endpoint = Event::default().event("endpoint").data(self.endpoint());
        let conn = self.clone();
        let guard = StreamGuard::new(move || {
            sessions.remove(&conn.session_id);
            if conn.close() {
                tracing::info!("Legacy SSE session {} disconnected", conn.session_id);
            }
        });
        Ok(event_stream(rx, Some(endpoint), heartbeat, guard))
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

/// `GET /sse`
pub async fn handle_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = uuid::Uuid::new_v4().to_string();
    let conn = Arc::new(LegacySseConnection::new(
        session_id.clone(),
        state.registry.clone(),
    ));
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let info = SessionInfo::new(session_id.clone(), TransportKind::LegacySse, user_agent);
    if let Err(e) = state.sessions.insert(info, conn.clone()) {
        return e.into_response();
    }

    match conn.open_stream(state.sessions.clone(), state.heartbeat) {
        Ok(stream) => {
            tracing::info!("Legacy SSE session {session_id} connected");
            Sse::new(stream).into_response()
        }
        Err(e) => {
            state.sessions.remove(&session_id);
            e.into_response()
        }
    }
}

/// `POST /sse`: clients probing for the streamable transport are sent to `/mcp`.
pub async fn handle_post_redirect() -> Redirect {
    Redirect::temporary("/mcp")
}

/// `POST /messages?sessionId=…`
pub async fn handle_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return McpError::MissingSessionId.into_response();
    };
    let Some(conn) = state.sessions.connection(&session_id).filter(|conn| {
        conn.kind() == TransportKind::LegacySse && conn.state() == ConnectionState::Active
    }) else {
        return McpError::UnknownSession(session_id).into_response();
    };

    let (messages, _) = match parse_body(&body) {
        Ok(parsed) => parsed,
        Err(e) => return e.into_response(),
    };
    record_activity(&state.sessions, &session_id, &messages);

    match conn.deliver(messages).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::warn!("Legacy SSE session {session_id} lost its stream: {e}");
            if let Some(conn) = state.sessions.remove(&session_id) {
                conn.close();
            }
            e.into_response()
        }
    }
}
