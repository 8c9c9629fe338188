// src/simulation/tools.rs — Tools a simulated persona can use

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::budget::TimeBudget;
use crate::core::tools::{Tool, ToolRegistry};
use crate::infra::config::ModuleSeed;
use crate::memory::VersionStore;
use crate::provider::{ChatRequest, InferenceService};

pub const LIST_MODULES: &str = "list_modules";
pub const USE_MODULE: &str = "use_module";
pub const REPORT_ISSUE: &str = "report_issue";

/// Default expected cost of one module call.
const USE_MODULE_COST_MS: u64 = 6_000;

/// Lists the product's modules.
pub struct ListModulesTool {
    modules: Vec<ModuleSeed>,
}

impl ListModulesTool {
    pub fn new(modules: Vec<ModuleSeed>) -> Self {
        Self { modules }
    }
}

#[async_trait]
impl Tool for ListModulesTool {
    fn name(&self) -> &str {
        LIST_MODULES
    }

    fn description(&self) -> &str {
        "List the product's modules and what each one does."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn estimated_cost_ms(&self) -> u64 {
        10
    }

    async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
        Ok(Value::Array(
            self.modules
                .iter()
                .map(|m| json!({"module": m.key, "description": m.description}))
                .collect(),
        ))
    }
}

/// Runs a module's current prompt against the inference service with the
/// persona's input, the way the real product would.
pub struct UseModuleTool {
    provider: Arc<dyn InferenceService>,
    versions: VersionStore,
    budget: TimeBudget,
    cost_ms: u64,
}

impl UseModuleTool {
    pub fn new(provider: Arc<dyn InferenceService>, versions: VersionStore, budget: TimeBudget) -> Self {
        Self {
            provider,
            versions,
            budget,
            cost_ms: USE_MODULE_COST_MS,
        }
    }

    pub fn with_cost(mut self, cost_ms: u64) -> Self {
        self.cost_ms = cost_ms;
        self
    }
}

#[async_trait]
impl Tool for UseModuleTool {
    fn name(&self) -> &str {
        USE_MODULE
    }

    fn description(&self) -> &str {
        "Use one product module. Give the module key and the input you would type into it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "module": {"type": "string"},
                "input": {"type": "string"}
            },
            "required": ["module", "input"]
        })
    }

    fn estimated_cost_ms(&self) -> u64 {
        self.cost_ms
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let module = params["module"]
            .as_str()
            .context("missing 'module' parameter")?;
        let input = params["input"].as_str().unwrap_or_default();
        if input.trim().is_empty() {
            anyhow::bail!("missing 'input' parameter");
        }

        // The lock is released before the inference call.
        let config = self.versions.require_current(module)?;
        let request = ChatRequest::new(config.payload, input).with_limits(1_000, 0.7);
        let response = self
            .budget
            .start()
            .with_timeout(self.provider.chat(request), None)
            .await??;

        Ok(json!({
            "module": module,
            "version": config.version,
            "output": response.content,
        }))
    }
}

/// Acknowledges a friction point. The runner collects reported issues from
/// the trace.
pub struct ReportIssueTool;

#[async_trait]
impl Tool for ReportIssueTool {
    fn name(&self) -> &str {
        REPORT_ISSUE
    }

    fn description(&self) -> &str {
        "Report a problem or frustration with the product, in one sentence."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"issue": {"type": "string"}},
            "required": ["issue"]
        })
    }

    fn estimated_cost_ms(&self) -> u64 {
        0
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let issue = reported_issue(&params).context("missing 'issue' parameter")?;
        Ok(json!({"recorded": issue}))
    }
}

/// The issue text of a `report_issue` call, whether given as an object or a
/// bare string.
pub fn reported_issue(params: &Value) -> Option<&str> {
    params["issue"]
        .as_str()
        .or_else(|| params["input"].as_str())
        .or_else(|| params.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The registry every simulation shares.
pub fn simulation_registry(
    provider: Arc<dyn InferenceService>,
    versions: VersionStore,
    modules: Vec<ModuleSeed>,
    module_budget: TimeBudget,
    module_cost_ms: u64,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ListModulesTool::new(modules)));
    registry.register(Arc::new(
        UseModuleTool::new(provider, versions, module_budget).with_cost(module_cost_ms),
    ));
    registry.register(Arc::new(ReportIssueTool));
    registry
}
