//! Tools: terminal_list, terminal_send_input, terminal_read_buffer.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use termbridge::{TerminalDirectory, TerminalSelector};

use crate::types::McpResult;

use super::registry::{RegistryError, Tool, ToolRegistryBuilder};
use super::{parse_args, ToolDeps};

const CATEGORY: &str = "terminal";
const DEFAULT_READ_LINES: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendInputParams {
    #[serde(default)]
    terminal_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    index: Option<usize>,
    input: String,
    #[serde(default = "default_true")]
    append_newline: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadBufferParams {
    #[serde(default)]
    terminal_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default = "default_lines")]
    lines: usize,
}

fn default_true() -> bool {
    true
}

fn default_lines() -> usize {
    DEFAULT_READ_LINES
}

fn selector_fields() -> Value {
    json!({
        "terminalId": { "type": "string", "description": "Terminal id", "optional": true },
        "title": { "type": "string", "description": "Terminal title", "optional": true },
        "index": { "type": "integer", "description": "Position in terminal_list", "optional": true }
    })
}

fn with_selector(extra: Value) -> Value {
    let mut schema = selector_fields();
    if let (Some(base), Value::Object(extra)) = (schema.as_object_mut(), extra) {
        base.extend(extra);
    }
    schema
}

pub fn register(builder: &mut ToolRegistryBuilder, deps: &ToolDeps) -> Result<(), RegistryError> {
    let terminals = deps.terminals.clone();
    builder.register(Tool::new(
        "terminal_list",
        "List the terminals available for input and output",
        CATEGORY,
        json!({}),
        move |_, _| {
            let terminals = terminals.clone();
            async move { list(terminals) }
        },
    ))?;

    let terminals = deps.terminals.clone();
    builder.register(Tool::new(
        "terminal_send_input",
        "Type text into a terminal, followed by Enter unless appendNewline is false",
        CATEGORY,
        with_selector(json!({
            "input": { "type": "string", "description": "Text to send" },
            "appendNewline": { "type": "boolean", "optional": true }
        })),
        move |args, _| {
            let terminals = terminals.clone();
            async move { send_input(terminals, args).await }
        },
    ))?;

    let terminals = deps.terminals.clone();
    builder.register(Tool::new(
        "terminal_read_buffer",
        "Read the most recent lines of a terminal's output",
        CATEGORY,
        with_selector(json!({
            "lines": { "type": "integer", "description": "Lines to return (default 50)", "optional": true }
        })),
        move |args, _| {
            let terminals = terminals.clone();
            async move { read_buffer(terminals, args) }
        },
    ))?;

    Ok(())
}

fn list(terminals: Arc<dyn TerminalDirectory>) -> McpResult<Value> {
    let list = terminals.list();
    Ok(json!({
        "success": true,
        "count": list.len(),
        "terminals": list,
    }))
}

async fn send_input(terminals: Arc<dyn TerminalDirectory>, args: Value) -> McpResult<Value> {
    let params: SendInputParams = parse_args(args)?;
    let selector = TerminalSelector {
        id: params.terminal_id,
        title: params.title,
        index: params.index,
    };
    let terminal = terminals.resolve(&selector)?;

    let mut input = params.input;
    if params.append_newline {
        input.push('\n');
    }
    terminal.send_input(&input).await?;

    Ok(json!({
        "success": true,
        "terminalId": terminal.id(),
        "bytesSent": input.len(),
    }))
}

fn read_buffer(terminals: Arc<dyn TerminalDirectory>, args: Value) -> McpResult<Value> {
    let params: ReadBufferParams = parse_args(args)?;
    let selector = TerminalSelector {
        id: params.terminal_id,
        title: params.title,
        index: params.index,
    };
    let terminal = terminals.resolve(&selector)?;
    let lines = terminal.read_buffer(params.lines);

    Ok(json!({
        "success": true,
        "terminalId": terminal.id(),
        "lineCount": lines.len(),
        "lines": lines,
    }))
}
