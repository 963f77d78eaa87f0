//! Error types, JSON-RPC error codes, and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use termbridge::BridgeError;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Server-defined error codes.
pub mod mcp_error_codes {
    /// Transport and session failures ("no valid session", forbidden origin, ...).
    pub const SERVER_ERROR: i32 = -32000;
    pub const TOOL_NOT_FOUND: i32 = -32803;
    pub const BRIDGE_ERROR: i32 = -32850;
}

/// All errors that can occur in the MCP server.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("{0}")]
    Bridge(String),

    /// A core-library failure, kept typed so callers can match on it.
    #[error(transparent)]
    Core(#[from] BridgeError),

    #[error("Address already in use: {0}")]
    AddressInUse(String),

    #[error("Server failed to start: {0}")]
    Startup(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Session required: open a stream with GET /sse or initialize with POST /mcp")]
    SessionRequired,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Missing sessionId query parameter")]
    MissingSessionId,

    #[error("No active stream for session: {0}")]
    UnknownSession(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) | McpError::Json(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_) | McpError::Transport(_) | McpError::Io(_) => INTERNAL_ERROR,
            McpError::ToolNotFound(_) => TOOL_NOT_FOUND,
            McpError::Bridge(_) => BRIDGE_ERROR,
            McpError::Core(BridgeError::InvalidInput(_) | BridgeError::PathEscape(_)) => {
                INVALID_PARAMS
            }
            McpError::Core(_) => BRIDGE_ERROR,
            McpError::AddressInUse(_)
            | McpError::Startup(_)
            | McpError::Forbidden(_)
            | McpError::BadRequest(_)
            | McpError::SessionRequired
            | McpError::SessionNotFound(_)
            | McpError::MissingSessionId
            | McpError::UnknownSession(_) => SERVER_ERROR,
        }
    }

    /// HTTP status used when the error ends an HTTP exchange.
    pub fn status(&self) -> StatusCode {
        match self {
            McpError::ParseError(_)
            | McpError::Json(_)
            | McpError::InvalidRequest(_)
            | McpError::InvalidParams(_)
            | McpError::BadRequest(_)
            | McpError::SessionRequired
            | McpError::MissingSessionId => StatusCode::BAD_REQUEST,
            McpError::Forbidden(_) => StatusCode::FORBIDDEN,
            McpError::SessionNotFound(_)
            | McpError::UnknownSession(_)
            | McpError::ToolNotFound(_)
            | McpError::MethodNotFound(_) => StatusCode::NOT_FOUND,
            McpError::Core(core) => match core {
                BridgeError::TransferNotFound(_)
                | BridgeError::TerminalNotFound(_)
                | BridgeError::ProfileNotFound(_)
                | BridgeError::SourceMissing(_) => StatusCode::NOT_FOUND,
                BridgeError::InvalidState { .. } => StatusCode::CONFLICT,
                BridgeError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                BridgeError::InvalidInput(_) | BridgeError::PathEscape(_) => {
                    StatusCode::BAD_REQUEST
                }
                BridgeError::Io(_) | BridgeError::Terminal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data: None,
            },
        }
    }
}

impl IntoResponse for McpError {
    fn into_response(self) -> Response {
        let body = serde_json::to_value(self.to_json_rpc_error(RequestId::Null))
            .unwrap_or_default();
        (self.status(), Json(body)).into_response()
    }
}

pub type McpResult<T> = Result<T, McpError>;
