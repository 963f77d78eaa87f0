//! Server-sent event plumbing shared by both transports.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::response::sse::Event;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{McpError, McpResult};

pub type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Runs a closure when the owning stream is dropped, whatever the reason:
/// client disconnect, write failure, or server shutdown.
pub struct StreamGuard(Option<Box<dyn FnOnce() + Send + Sync>>);

impl StreamGuard {
    pub fn new(on_drop: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(on_drop)))
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(on_drop) = self.0.take() {
            on_drop();
        }
    }
}

/// The sending half of a connection's SSE stream.
///
/// Attaching a new stream replaces the previous sender; each attachment gets
/// a generation so a stale stream cannot detach its successor.
#[derive(Default)]
pub struct PushChannel {
    sender: Mutex<Option<(u64, mpsc::UnboundedSender<Value>)>>,
    generation: AtomicU64,
}

impl PushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<(u64, mpsc::UnboundedSender<Value>)>> {
        self.sender.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn attach(&self) -> (u64, mpsc::UnboundedReceiver<Value>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        if self.slot().replace((generation, tx)).is_some() {
            tracing::debug!("Replacing an open stream (generation {generation})");
        }
        (generation, rx)
    }

    /// Drop the sender if it still belongs to `generation`.
    pub fn detach(&self, generation: u64) {
        let mut slot = self.slot();
        if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
            *slot = None;
        }
    }

    pub fn close(&self) {
        self.slot().take();
    }

    pub fn is_attached(&self) -> bool {
        self.slot().as_ref().is_some_and(|(_, tx)| !tx.is_closed())
    }

    pub fn send(&self, message: Value) -> McpResult<()> {
        let slot = self.slot();
        let (_, tx) = slot
            .as_ref()
            .ok_or_else(|| McpError::Transport("No open stream".to_string()))?;
        tx.send(message)
            .map_err(|_| McpError::Transport("Stream closed by client".to_string()))
    }
}

enum Next {
    Message(Value),
    Heartbeat,
    Closed,
}

/// Build an SSE stream that forwards pushed messages as `message` events and
/// emits a heartbeat comment every `heartbeat`. The timer and `guard` live
/// inside the stream and are dropped with it.
pub fn event_stream(
    mut rx: mpsc::UnboundedReceiver<Value>,
    first: Option<Event>,
    heartbeat: Duration,
    guard: StreamGuard,
) -> EventStream {
    let stream = async_stream::stream! {
        let _guard = guard;
        if let Some(event) = first {
            yield Ok(event);
        }

        let start = tokio::time::Instant::now() + heartbeat;
        let mut ticker = tokio::time::interval_at(start, heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let next = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(value) => Next::Message(value),
                    None => Next::Closed,
                },
                _ = ticker.tick() => Next::Heartbeat,
            };
            match next {
                Next::Message(value) => {
                    yield Ok(Event::default().event("message").data(value.to_string()));
                }
                Next::Heartbeat => yield Ok(Event::default().comment("heartbeat")),
                Next::Closed => break,
            }
        }
    };
    stream.boxed()
}
