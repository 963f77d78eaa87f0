//! The HTTP server façade: routing, listener lifecycle, and session control.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderName;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};

use crate::api;
use crate::config::ServerConfig;
use crate::session::{SessionInfo, SessionStore};
use crate::tools::ToolRegistry;
use crate::transport::origin::origin_guard;
use crate::transport::streamable::MCP_SESSION_ID;
use crate::transport::{sse, streamable};
use crate::types::{McpError, McpResult};

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub sessions: Arc<SessionStore>,
    pub heartbeat: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<ToolRegistry>, heartbeat: Duration) -> Self {
        Self {
            registry,
            sessions: Arc::new(SessionStore::new()),
            heartbeat,
            started_at: Instant::now(),
        }
    }
}

/// Build the axum router. Protocol routes sit behind origin validation;
/// the informational routes do not.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)]);

    let protocol = Router::new()
        .route(
            "/mcp",
            post(streamable::handle_post)
                .get(streamable::handle_get)
                .delete(streamable::handle_delete),
        )
        .route(
            "/sse",
            get(sse::handle_stream).post(sse::handle_post_redirect),
        )
        .route("/messages", post(sse::handle_messages))
        .route("/api/tool/:name", post(api::invoke_tool))
        .route_layer(middleware::from_fn(origin_guard));

    Router::new()
        .route("/health", get(api::health))
        .route("/info", get(api::info))
        .route("/tools", get(api::tools))
        .merge(protocol)
        .layer(cors)
        .with_state(state)
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the listener and the session store.
pub struct ProtocolServer {
    config: ServerConfig,
    state: AppState,
    running: Mutex<Option<Running>>,
    last_port: std::sync::Mutex<Option<u16>>,
}

impl ProtocolServer {
    pub fn new(config: ServerConfig, registry: ToolRegistry) -> Self {
        let state = AppState::new(Arc::new(registry), config.heartbeat());
        Self {
            config,
            state,
            running: Mutex::new(None),
            last_port: std::sync::Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.state.registry
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind `host:port` and start serving. Port 0 picks a free port.
    pub async fn start(&self, port: u16) -> McpResult<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            tracing::warn!("Server already running on {}", current.addr);
            return Ok(current.addr);
        }

        let bind_addr = format!("{}:{port}", self.config.host);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                McpError::AddressInUse(bind_addr.clone())
            } else {
                McpError::Startup(format!("{bind_addr}: {e}"))
            }
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| McpError::Startup(e.to_string()))?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, self.router(), shutdown_rx));
        *running = Some(Running {
            addr,
            shutdown,
            task,
        });
        *self.last_port.lock().unwrap_or_else(|p| p.into_inner()) = Some(addr.port());

        tracing::info!("MCP server listening on http://{addr} (streamable: /mcp, legacy: /sse)");
        Ok(addr)
    }

    /// Close every session, stop accepting, and abort every connection still
    /// open, including requests in flight. Returns once the sockets are gone.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let closed = self
            .state
            .sessions
            .drain()
            .into_iter()
            .filter(|conn| conn.close())
            .count();
        tracing::info!("Stopping MCP server on {} ({closed} sessions closed)", running.addr);

        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            tracing::warn!("Accept loop ended abnormally: {e}");
        }
    }

    /// Stop, then start again on the previously bound port.
    pub async fn restart(&self) -> McpResult<SocketAddr> {
        let port = self
            .last_port
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .ok_or_else(|| McpError::Startup("Server was never started".to_string()))?;
        self.stop().await;
        self.start(port).await
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Live sessions across both transports.
    pub fn connection_count(&self) -> usize {
        self.state.sessions.len()
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.state.sessions.list()
    }

    /// Remove and close a session. Returns false if no such session exists.
    pub fn close_session(&self, id: &str) -> bool {
        match self.state.sessions.remove(id) {
            Some(conn) => {
                conn.close();
                tracing::info!("Session {id} closed");
                true
            }
            None => false,
        }
    }
}

impl Drop for ProtocolServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(());
            running.task.abort();
        }
    }
}

/// Accept connections until shutdown. Each connection is served on a task in
/// `connections`; on shutdown the listener is dropped and every task is aborted,
/// which closes its socket.
async fn accept_loop(listener: TcpListener, app: Router, mut shutdown: oneshot::Receiver<()>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {e}");
                        continue;
                    }
                };
                let app = app.clone();
                connections.spawn(async move {
                    let service = hyper::service::service_fn(
                        move |req: hyper::Request<hyper::body::Incoming>| {
                            app.clone().oneshot(req.map(axum::body::Body::new))
                        },
                    );
                    let builder = auto::Builder::new(TokioExecutor::new());
                    if let Err(e) = builder
                        .serve_connection_with_upgrades(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!("Connection from {peer} ended: {e}");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);
    let open = connections.len();
    connections.shutdown().await;
    if open > 0 {
        tracing::info!("Closed {open} open connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ProtocolServer {
        ProtocolServer::new(ServerConfig::default(), ToolRegistry::builder().seal())
    }

    #[tokio::test]
    async fn test_restart_requires_prior_start() {
        let server = server();
        assert!(matches!(server.restart().await, Err(McpError::Startup(_))));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let server = server();
        let addr = server.start(0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr().await, Some(addr));
        assert_eq!(server.start(0).await.unwrap(), addr);

        server.stop().await;
        assert!(!server.is_running().await);
        server.stop().await;
        assert!(!server.close_session("missing"));
    }
}
