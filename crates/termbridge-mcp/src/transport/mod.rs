//! HTTP transports for MCP: Streamable HTTP (`/mcp`) and legacy SSE (`/sse` + `/messages`).

pub mod framing;
pub mod origin;
pub mod sse;
pub mod stream;
pub mod streamable;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::session::{SessionStore, TransportKind};
use crate::types::{JsonRpcMessage, McpResult};

pub use sse::LegacySseConnection;
pub use stream::EventStream;
pub use streamable::StreamableConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Uninitialized = 0,
    Connecting = 1,
    Active = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Uninitialized,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }
}

/// Lock-free connection state cell.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move to `next` unless already closed.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                (cur != ConnectionState::Closed as u8).then_some(next as u8)
            })
            .is_ok()
    }

    /// Returns true only for the call that performed the transition.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(ConnectionState::Closed as u8, Ordering::SeqCst) != ConnectionState::Closed as u8
    }
}

/// Where the responses to a delivered batch went.
#[derive(Debug)]
pub enum Delivery {
    /// Responses to return in the HTTP body (empty when only notifications arrived).
    Inline(Vec<Value>),
    /// Number of responses pushed onto the connection's event stream.
    Pushed(usize),
}

/// One session's transport. Both the streamable and the legacy SSE
/// connection implement this; the server only talks to the trait.
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    fn session_id(&self) -> &str;

    fn kind(&self) -> TransportKind;

    fn state(&self) -> ConnectionState;

    /// Run messages through this connection's protocol handler, in order.
    async fn deliver(&self, messages: Vec<JsonRpcMessage>) -> McpResult<Delivery>;

    /// Open the server-to-client event stream.
    fn open_stream(
        self: Arc<Self>,
        sessions: Arc<SessionStore>,
        heartbeat: Duration,
    ) -> McpResult<EventStream>;

    /// Close the connection. Returns false if it was already closed.
    fn close(&self) -> bool;
}

/// Record each named message against the session's activity history.
pub(crate) fn record_activity(sessions: &SessionStore, session_id: &str, messages: &[JsonRpcMessage]) {
    for label in messages.iter().filter_map(JsonRpcMessage::activity_label) {
        sessions.record_activity(session_id, label);
    }
}
