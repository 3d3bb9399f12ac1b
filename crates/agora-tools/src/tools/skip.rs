//! skip: deliberately do nothing this cycle

use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};

pub const NAME: &str = "skip";

pub struct SkipTool;

#[async_trait::async_trait]
impl Tool for SkipTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Do nothing this time. Call it as your first and only action when nothing \
         you received needs a response. The wake-up is then forgotten entirely."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": { "type": "string" }
            }
        })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> ToolResult {
        ctx.mark_skipped().await;
        ToolResult::Json(json!({ "skipped": true }))
    }
}
