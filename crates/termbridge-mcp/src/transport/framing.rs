//! Request body framing: a single JSON-RPC message or a batch array.

use serde_json::Value;

use crate::types::{JsonRpcMessage, McpError, McpResult};

/// Parse a POST body. Returns the messages and whether they arrived as a batch.
pub fn parse_body(body: &[u8]) -> McpResult<(Vec<JsonRpcMessage>, bool)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(McpError::ParseError("Empty message".to_string()));
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| McpError::ParseError(e.to_string()))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(McpError::InvalidRequest("Empty batch".to_string()));
            }
            let messages = items
                .into_iter()
                .map(parse_message)
                .collect::<McpResult<Vec<_>>>()?;
            Ok((messages, true))
        }
        single => Ok((vec![parse_message(single)?], false)),
    }
}

fn parse_message(value: Value) -> McpResult<JsonRpcMessage> {
    // Ids we cannot echo back must not fall through to a notification.
    if let Some(id) = value.get("id") {
        let supported = match id {
            Value::String(_) | Value::Null => true,
            Value::Number(n) => n.is_i64(),
            _ => false,
        };
        if !supported {
            return Err(McpError::InvalidRequest(format!("Unsupported id: {id}")));
        }
    }
    serde_json::from_value(value).map_err(|e| McpError::InvalidRequest(e.to_string()))
}
