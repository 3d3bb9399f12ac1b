//! send_message: post into a space, optionally mentioning another agent
//!
//! This is the tool whose `text` argument is relayed live while the model is
//! still writing it, so its argument names are part of the relay contract.

use crate::context::{MentionRequest, ToolContext};
use crate::registry::{Tool, ToolResult};
use agora_core::{EntityId, MemberKind, SpaceEvent, SpaceId, SpaceMessage};
use serde_json::{json, Value};
use tracing::debug;

pub const NAME: &str = "send_message";

pub struct SendMessageTool;

#[async_trait::async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Post a message into a space. Omit spaceId to post into your active space. \
         Mention another agent to hand them the conversation; set expectReply when \
         you need their answer before continuing."
    }

    fn prompt(&self) -> &str {
        "Everything you want others to read must go through send_message. \
         Text you write outside of it is private narration."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "spaceId": {
                    "type": "string",
                    "description": "Target space (defaults to the active space)"
                },
                "text": {
                    "type": "string",
                    "description": "Message body"
                },
                "mention": {
                    "type": "object",
                    "properties": {
                        "entityId": { "type": "string" },
                        "reason": { "type": "string" },
                        "expectReply": { "type": "boolean" }
                    },
                    "required": ["entityId"]
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let text = match args.get("text").and_then(Value::as_str) {
            Some(t) if !t.trim().is_empty() => t,
            _ => return ToolResult::error("Missing required parameter: text"),
        };

        let space_id = match args.get("spaceId").and_then(Value::as_str) {
            Some(s) => SpaceId::new(s),
            None => match ctx.active_space().await {
                Some(s) => s,
                None => {
                    return ToolResult::error(
                        "No active space. Pass spaceId or call enter_space first.",
                    )
                }
            },
        };

        match ctx.services.spaces.is_member(&space_id, &ctx.entity_id).await {
            Ok(true) => {}
            Ok(false) => {
                return ToolResult::error(format!("You are not a member of space {space_id}"))
            }
            Err(e) => return ToolResult::error(e.to_string()),
        }

        let mention = match parse_mention(&args) {
            Ok(m) => m,
            Err(e) => return ToolResult::error(e),
        };

        let mut message =
            SpaceMessage::new(space_id.clone(), ctx.entity_id.clone(), MemberKind::Agent, text);
        message.run_id = Some(ctx.run_id.clone());

        if let Err(e) = ctx.services.log.append(message.clone()).await {
            return ToolResult::error(e.to_string());
        }
        ctx.services
            .bus
            .publish_space(
                &space_id,
                SpaceEvent::Message {
                    message: message.clone(),
                },
            )
            .await;
        ctx.set_active_space(space_id.clone()).await;
        ctx.record_post(message.clone()).await;

        let mut mentioned = Value::Null;
        if let Some((callee, reason, expect_reply)) = mention {
            debug!(entity = %ctx.entity_id, callee = %callee, "mention recorded");
            mentioned = json!(callee);
            ctx.record_mention(MentionRequest {
                space_id: space_id.clone(),
                message_id: message.id.clone(),
                callee,
                reason,
                expect_reply,
            })
            .await;
        }

        ToolResult::Json(json!({
            "ok": true,
            "messageId": message.id,
            "spaceId": space_id,
            "mentioned": mentioned,
        }))
    }
}

fn parse_mention(args: &Value) -> Result<Option<(EntityId, String, bool)>, String> {
    let Some(mention) = args.get("mention").filter(|m| !m.is_null()) else {
        return Ok(None);
    };
    let callee = mention
        .get("entityId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "mention.entityId is required".to_string())?;
    let reason = mention
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let expect_reply = mention
        .get("expectReply")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(Some((EntityId::new(callee), reason, expect_reply)))
}
