//! Tool execution
//!
//! The loop talks to tools through `ToolExecutor`. `ToolRegistry` is the
//! in-process implementation: named handlers plus the static declarations
//! the control validator and cognition prompt need.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::reasoning::control::ToolSpec;
use crate::reasoning::loop_types::ToolArguments;
use crate::types::ExecutionFailure;

/// Static, serializable description of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_args: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_args: Vec::new(),
        }
    }

    pub fn with_required(mut self, args: &[&str]) -> Self {
        self.required_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn to_spec(&self) -> ToolSpec {
        let required: Vec<&str> = self.required_args.iter().map(String::as_str).collect();
        ToolSpec::new(&self.name, &self.description).with_required(&required)
    }
}

/// Executes a single tool call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &ToolArguments,
    ) -> Result<serde_json::Value, ExecutionFailure>;

    /// Every tool this executor can run.
    fn descriptors(&self) -> Vec<ToolDescriptor>;
}

type ToolHandler =
    Arc<dyn Fn(ToolArguments) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: ToolHandler,
}

/// In-process tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous handler.
    pub fn register<F>(&mut self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(&ToolArguments) -> Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.register_async(descriptor, move |args| {
            let handler = Arc::clone(&handler);
            async move { handler(&args) }
        });
    }

    /// Register an asynchronous handler.
    pub fn register_async<F, Fut>(&mut self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| handler(args).boxed());
        tracing::debug!(tool = %descriptor.name, "Tool registered");
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &ToolArguments,
    ) -> Result<serde_json::Value, ExecutionFailure> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ExecutionFailure::UnknownTool(tool_name.to_string()))?;
        (tool.handler)(arguments.clone())
            .await
            .map_err(|reason| ExecutionFailure::Failed {
                tool: tool_name.to_string(),
                reason,
            })
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }
}
