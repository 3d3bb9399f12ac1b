//! Tool registry and trait definitions
//!
//! Each tool is a self-contained module implementing the Tool trait.
//! Tools act on the world only through the `ToolContext` of the cycle
//! that invoked them.

use crate::context::ToolContext;
use agora_llm::LlmTool;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum ToolResult {
    Text(String),
    Json(Value),
    Error(String),
    /// Executed elsewhere; the result arrives later through the inbox.
    Pending,
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Value recorded as the tool-result part in consciousness.
    pub fn to_output(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Json(v) => v.clone(),
            Self::Error(e) => json!({ "error": e }),
            Self::Pending => json!({ "status": "pending" }),
        }
    }
}

/// The Tool trait: implement this to add a new capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "send_message", "skip").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// System prompt fragment for this tool (injected into LLM context).
    fn prompt(&self) -> &str {
        ""
    }

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Whether a client outside this process executes the tool.
    fn is_external(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;

    /// Convert to the LLM tool definition format.
    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Remove a tool by name.
    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args, ctx).await,
            None => ToolResult::Error(format!("Tool not found: {}", name)),
        }
    }

    /// LLM tool definitions, sorted by name so requests are stable.
    pub fn get_definitions(&self) -> Vec<LlmTool> {
        let mut defs: Vec<LlmTool> = self.tools.values().map(|t| t.to_llm_tool()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// System prompt fragments from all tools.
    pub fn combined_prompts(&self) -> String {
        let mut tools: Vec<&Arc<dyn Tool>> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
            .into_iter()
            .map(|t| t.prompt())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    pub fn is_external(&self, name: &str) -> bool {
        self.tools.get(name).map_or(false, |t| t.is_external())
    }
}
