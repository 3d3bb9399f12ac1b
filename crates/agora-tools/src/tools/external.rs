//! External tools: declared in configuration, executed by a client
//!
//! Calling one records the request and returns `Pending`; the client later
//! submits the result, which reaches the agent as a `tool_result` inbox event.

use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExternalToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub struct ExternalTool {
    spec: ExternalToolSpec,
}

impl ExternalTool {
    pub fn new(spec: ExternalToolSpec) -> Self {
        Self { spec }
    }
}

#[async_trait::async_trait]
impl Tool for ExternalTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn input_schema(&self) -> Value {
        self.spec.input_schema.clone()
    }

    fn is_external(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::Pending
    }
}
