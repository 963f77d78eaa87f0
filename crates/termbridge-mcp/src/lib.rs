//! termbridge MCP server: terminal, file transfer, and profile tools over
//! Streamable HTTP and legacy SSE.

pub mod api;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{load_config, resolve_config_path, ServerConfig};
pub use protocol::ProtocolHandler;
pub use server::{router, AppState, ProtocolServer};
pub use session::{SessionInfo, SessionStore, TransportKind};
pub use tools::{builtin_registry, Tool, ToolContext, ToolDeps, ToolRegistry, ToolRegistryBuilder};
