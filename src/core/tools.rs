// src/core/tools.rs — Tool trait and registry
//
// Tools are the only way a ReAct execution touches the outside world. The
// registry never lets a tool failure escape as an error: unknown names,
// returned errors and panics all come back as a failed ToolResult that the
// engine turns into an observation.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::infra::errors::EngineError;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters(&self) -> Value;
    /// Expected wall-clock cost, checked against the remaining budget
    /// before the tool runs.
    fn estimated_cost_ms(&self) -> u64;
    async fn execute(&self, params: Value) -> anyhow::Result<Value>;
}

/// Tool description as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub estimated_cost_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn ok(data: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }

    /// Text fed back to the model as the step's observation.
    pub fn to_observation(&self) -> String {
        if self.success {
            match &self.data {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => "(no output)".into(),
            }
        } else {
            format!("ERROR: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// Name-keyed tool table. Ordered so the prompt catalog is stable.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing (and returning) any tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        let replaced = self.tools.insert(name.clone(), tool);
        if replaced.is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool registration");
        }
        replaced
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, EngineError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound { name: name.into() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool by name. Always returns a timed result.
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        let start = Instant::now();
        let tool = match self.get(name) {
            Ok(t) => t,
            Err(e) => return ToolResult::failed(e.to_string(), 0),
        };

        let outcome = AssertUnwindSafe(tool.execute(params)).catch_unwind().await;
        let elapsed = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(data)) => ToolResult::ok(data, elapsed),
            Ok(Err(e)) => {
                tracing::debug!(tool = name, error = %e, "Tool returned an error");
                ToolResult::failed(
                    EngineError::ToolFailed {
                        name: name.into(),
                        message: e.to_string(),
                    }
                    .to_string(),
                    elapsed,
                )
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".into());
                tracing::warn!(tool = name, %message, "Tool panicked");
                ToolResult::failed(format!("Tool '{name}' panicked: {message}"), elapsed)
            }
        }
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .map(|t| ToolDef {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
                estimated_cost_ms: t.estimated_cost_ms(),
            })
            .collect()
    }

    /// Tool catalog rendered for a system prompt.
    pub fn catalog_text(&self) -> String {
        if self.tools.is_empty() {
            return "(no tools available)".into();
        }
        self.definitions()
            .iter()
            .map(|d| format!("- {}: {}\n  parameters: {}", d.name, d.description, d.parameters))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Adapter that turns an async closure into a [`Tool`].
pub struct FnTool<F> {
    name: String,
    description: String,
    parameters: Value,
    cost_ms: u64,
    f: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        cost_ms: u64,
        f: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            cost_ms,
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn estimated_cost_ms(&self) -> u64 {
        self.cost_ms
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        (self.f)(params).await
    }
}
