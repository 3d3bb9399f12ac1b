//! enter_space: point the agent's active space somewhere else

use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use agora_core::SpaceId;
use serde_json::{json, Value};

pub const NAME: &str = "enter_space";

pub struct EnterSpaceTool;

#[async_trait::async_trait]
impl Tool for EnterSpaceTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Make a space your active space. Messages sent without a spaceId go there."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "spaceId": { "type": "string" }
            },
            "required": ["spaceId"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(space_id) = args.get("spaceId").and_then(Value::as_str) else {
            return ToolResult::error("Missing required parameter: spaceId");
        };
        let space_id = SpaceId::new(space_id);

        match ctx.services.spaces.is_member(&space_id, &ctx.entity_id).await {
            Ok(true) => {
                ctx.set_active_space(space_id.clone()).await;
                ToolResult::Json(json!({ "ok": true, "spaceId": space_id }))
            }
            Ok(false) => ToolResult::error(format!("You are not a member of space {space_id}")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
