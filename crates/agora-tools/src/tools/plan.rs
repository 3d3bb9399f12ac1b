//! set_plan / cancel_plan: agents schedule their own future work

use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use agora_core::{Error, Plan, PlanId, PlanSchedule, PlanStatus, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub const SET_PLAN: &str = "set_plan";
pub const CANCEL_PLAN: &str = "cancel_plan";

/// First fire time of a schedule strictly after `after`.
///
/// A one-shot plan always reports its own timestamp, even when already past,
/// so an overdue plan fires on the next scheduler tick.
pub fn next_run_after(schedule: &PlanSchedule, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match schedule {
        PlanSchedule::Once { run_at } => Ok(Some(*run_at)),
        PlanSchedule::Cron { expression } => {
            let cron = expression.parse::<croner::Cron>().map_err(|e| {
                Error::invalid_input(format!("invalid cron expression '{expression}': {e}"))
            })?;
            Ok(cron.iter_after(after).next())
        }
    }
}

fn parse_schedule(args: &Value) -> std::result::Result<PlanSchedule, String> {
    let cron = args.get("cron").and_then(Value::as_str);
    let run_at = args.get("runAt").and_then(Value::as_str);
    match (cron, run_at) {
        (Some(expression), None) => Ok(PlanSchedule::Cron {
            expression: expression.to_string(),
        }),
        (None, Some(ts)) => DateTime::parse_from_rfc3339(ts)
            .map(|d| PlanSchedule::Once {
                run_at: d.with_timezone(&Utc),
            })
            .map_err(|e| format!("runAt must be an RFC 3339 timestamp: {e}")),
        (Some(_), Some(_)) => Err("Pass either cron or runAt, not both".into()),
        (None, None) => Err("Missing schedule: pass cron or runAt".into()),
    }
}

pub struct SetPlanTool;

#[async_trait::async_trait]
impl Tool for SetPlanTool {
    fn name(&self) -> &str {
        SET_PLAN
    }

    fn description(&self) -> &str {
        "Schedule future work for yourself. Give a cron expression for recurring work \
         or runAt (RFC 3339) for a single wake-up. Pass planId to edit an existing plan."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "planId": { "type": "string" },
                "instruction": {
                    "type": "string",
                    "description": "What to do when the plan fires"
                },
                "cron": { "type": "string" },
                "runAt": { "type": "string", "format": "date-time" }
            },
            "required": ["instruction"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let instruction = match args.get("instruction").and_then(Value::as_str) {
            Some(i) if !i.trim().is_empty() => i.to_string(),
            _ => return ToolResult::error("Missing required parameter: instruction"),
        };
        let schedule = match parse_schedule(&args) {
            Ok(s) => s,
            Err(e) => return ToolResult::error(e),
        };
        let now = Utc::now();
        let next_run_at = match next_run_after(&schedule, now) {
            Ok(next) => next,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let plans = &ctx.services.plans;
        let plan = match args.get("planId").and_then(Value::as_str) {
            Some(id) => match plans.get(&PlanId::new(id)).await {
                Ok(Some(existing)) if existing.entity_id == ctx.entity_id => Plan {
                    schedule,
                    instruction,
                    status: PlanStatus::Pending,
                    next_run_at,
                    ..existing
                },
                Ok(_) => return ToolResult::error(format!("No plan {id}")),
                Err(e) => return ToolResult::error(e.to_string()),
            },
            None => Plan {
                id: PlanId::generate(),
                entity_id: ctx.entity_id.clone(),
                schedule,
                instruction,
                status: PlanStatus::Pending,
                next_run_at,
                last_run_at: None,
                created_at: now,
            },
        };

        let (id, next) = (plan.id.clone(), plan.next_run_at);
        if let Err(e) = plans.upsert(plan).await {
            return ToolResult::error(e.to_string());
        }
        ToolResult::Json(json!({ "ok": true, "planId": id, "nextRunAt": next }))
    }
}

pub struct CancelPlanTool;

#[async_trait::async_trait]
impl Tool for CancelPlanTool {
    fn name(&self) -> &str {
        CANCEL_PLAN
    }

    fn description(&self) -> &str {
        "Cancel one of your plans."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "planId": { "type": "string" }
            },
            "required": ["planId"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(id) = args.get("planId").and_then(Value::as_str) else {
            return ToolResult::error("Missing required parameter: planId");
        };
        let plans = &ctx.services.plans;
        let mut plan = match plans.get(&PlanId::new(id)).await {
            Ok(Some(p)) if p.entity_id == ctx.entity_id => p,
            Ok(_) => return ToolResult::error(format!("No plan {id}")),
            Err(e) => return ToolResult::error(e.to_string()),
        };
        plan.status = PlanStatus::Canceled;
        plan.next_run_at = None;
        match plans.upsert(plan).await {
            Ok(()) => ToolResult::Json(json!({ "ok": true, "planId": id })),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
