//! Tool registration and dispatch.
//!
//! Tools are collected in a [`ToolRegistryBuilder`] and sealed into an
//! immutable [`ToolRegistry`] before the server starts. The registry is then
//! shared by every connection behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::types::{McpError, McpResult, ToolDefinition};

use super::schema::InputSchema;

/// Per-call context handed to every tool handler.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Session the call arrived on; `None` for the direct HTTP API.
    pub session_id: Option<String>,
}

type Handler = Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, McpResult<Value>> + Send + Sync>;

/// A named tool: descriptor plus async handler.
pub struct Tool {
    name: String,
    description: String,
    category: String,
    schema: Value,
    handler: Handler,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            schema,
            handler: Arc::new(move |args, ctx| handler(args, ctx).boxed()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid schema for tool {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// Why an invocation never reached its handler.
#[derive(thiserror::Error, Debug)]
pub enum ToolInvocationError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },
}

impl From<ToolInvocationError> for McpError {
    fn from(e: ToolInvocationError) -> Self {
        match e {
            ToolInvocationError::NotFound(name) => McpError::ToolNotFound(name),
            other @ ToolInvocationError::InvalidInput { .. } => {
                McpError::InvalidParams(other.to_string())
            }
        }
    }
}

/// Result of a handler run. Handler errors and panics both land in `Failure`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    /// The JSON body returned to callers: the handler's value, or `{success:false, error}`.
    pub fn into_payload(self) -> Value {
        match self {
            ToolOutcome::Success(value) => value,
            ToolOutcome::Failure(error) => json!({ "success": false, "error": error }),
        }
    }
}

struct RegisteredTool {
    description: String,
    category: String,
    schema: InputSchema,
    handler: Handler,
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) -> Result<&mut Self, RegistryError> {
        if self.tools.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateTool(tool.name));
        }
        let schema =
            InputSchema::normalize(tool.schema).map_err(|reason| RegistryError::InvalidSchema {
                tool: tool.name.clone(),
                reason,
            })?;
        self.order.push(tool.name.clone());
        self.tools.insert(
            tool.name,
            RegisteredTool {
                description: tool.description,
                category: tool.category,
                schema,
                handler: tool.handler,
            },
        );
        Ok(self)
    }

    pub fn seal(self) -> ToolRegistry {
        tracing::debug!("Tool registry sealed with {} tools", self.order.len());
        ToolRegistry {
            order: self.order,
            tools: self.tools,
        }
    }
}

/// Immutable set of tools, shared by all connections.
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    /// Descriptors in registration order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name).map(|tool| (name, tool)))
            .map(|(name, tool)| ToolDefinition {
                name: name.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.schema.to_json_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn by_category(&self) -> BTreeMap<String, Vec<String>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in &self.order {
            if let Some(tool) = self.tools.get(name) {
                categories
                    .entry(tool.category.clone())
                    .or_default()
                    .push(name.clone());
            }
        }
        categories
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Look up, validate, and run a tool. Missing arguments count as `{}`.
    pub async fn invoke(
        &self,
        name: &str,
        input: Option<Value>,
        ctx: ToolContext,
    ) -> Result<ToolOutcome, ToolInvocationError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolInvocationError::NotFound(name.to_string()))?;

        let args = input.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        tool.schema
            .validate(&args)
            .map_err(|reason| ToolInvocationError::InvalidInput {
                tool: name.to_string(),
                reason,
            })?;

        let fut = (tool.handler)(args, ctx);
        let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => ToolOutcome::Success(value),
            Ok(Err(e)) => {
                tracing::warn!("Tool {name} failed: {e}");
                ToolOutcome::Failure(e.to_string())
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!("Tool {name} panicked: {msg}");
                ToolOutcome::Failure(format!("Tool {name} panicked: {msg}"))
            }
        };
        Ok(outcome)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Tool {
        Tool::new(
            "echo",
            "Echo the arguments back",
            "debug",
            json!({ "x": { "type": "integer" } }),
            |args, _ctx| async move { Ok(args) },
        )
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut builder = ToolRegistry::builder();
        builder.register(echo()).unwrap();
        let registry = builder.seal();

        assert_eq!(registry.names(), vec!["echo".to_string()]);
        assert_eq!(registry.by_category()["debug"], vec!["echo".to_string()]);
        let listed = registry.list_tools();
        assert_eq!(listed[0].input_schema["required"], json!(["x"]));

        let outcome = registry
            .invoke("echo", Some(json!({"x": 1})), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Success(json!({"x": 1})));
    }

    #[test]
    fn test_duplicate_and_bad_schema_rejected() {
        let mut builder = ToolRegistry::builder();
        builder.register(echo()).unwrap();
        assert!(matches!(
            builder.register(echo()),
            Err(RegistryError::DuplicateTool(_))
        ));
        let bad = Tool::new("bad", "", "debug", json!(42), |a, _| async move { Ok(a) });
        assert!(matches!(
            builder.register(bad),
            Err(RegistryError::InvalidSchema { .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_errors() {
        let mut builder = ToolRegistry::builder();
        builder.register(echo()).unwrap();
        let registry = builder.seal();

        let missing = registry
            .invoke("nope", None, ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, ToolInvocationError::NotFound(_)));
        assert_eq!(McpError::from(missing).code(), -32803);

        let invalid = registry
            .invoke("echo", Some(json!({"x": "one"})), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(invalid, ToolInvocationError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_become_failures() {
        let mut builder = ToolRegistry::builder();
        builder
            .register(Tool::new("fails", "", "debug", json!({}), |_, _| async {
                Err::<Value, _>(McpError::Bridge("disk on fire".into()))
            }))
            .unwrap()
            .register(Tool::new("panics", "", "debug", json!({}), |args, _| async move {
                if args.get("depth").is_none() {
                    panic!("boom");
                }
                Ok(args)
            }))
            .unwrap();
        let registry = builder.seal();

        let failed = registry
            .invoke("fails", None, ToolContext::default())
            .await
            .unwrap();
        assert_eq!(
            failed.into_payload(),
            json!({"success": false, "error": "disk on fire"})
        );

        let panicked = registry
            .invoke("panics", None, ToolContext::default())
            .await
            .unwrap();
        assert!(!panicked.is_success());
        let payload = panicked.into_payload();
        assert!(payload["error"].as_str().unwrap().contains("boom"));
    }
}
