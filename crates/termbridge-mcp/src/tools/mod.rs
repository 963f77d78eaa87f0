//! MCP tool implementations.

pub mod profile;
pub mod registry;
pub mod schema;
pub mod sftp;
pub mod terminal;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use termbridge::{ProfileStore, TerminalDirectory, TransferManager};

use crate::types::{McpError, McpResult};

pub use registry::{
    RegistryError, Tool, ToolContext, ToolInvocationError, ToolOutcome, ToolRegistry,
    ToolRegistryBuilder,
};
pub use schema::InputSchema;

/// Collaborators the built-in tools operate on.
#[derive(Clone)]
pub struct ToolDeps {
    pub transfers: Arc<TransferManager>,
    pub terminals: Arc<dyn TerminalDirectory>,
    pub profiles: Arc<ProfileStore>,
}

/// A builder pre-loaded with the terminal, sftp, and profile tools.
///
/// Callers may register more tools before sealing.
pub fn builtin_registry(deps: &ToolDeps) -> Result<ToolRegistryBuilder, RegistryError> {
    let mut builder = ToolRegistryBuilder::new();
    terminal::register(&mut builder, deps)?;
    sftp::register(&mut builder, deps)?;
    profile::register(&mut builder, deps)?;
    Ok(builder)
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> McpResult<T> {
    serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))
}
