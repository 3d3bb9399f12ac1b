//! Tests for agora-tools: ToolResult, ToolRegistry, and the builtin agent tools against in-memory stores

use agora_core::*;
use agora_store::*;
use agora_tools::*;
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    services: ToolServices,
    log: Arc<MemorySpaceLog>,
    bus: Arc<MemoryEventBus>,
    plans: Arc<MemoryPlanStore>,
}

fn fixture() -> Fixture {
    let lobby = Space::new("lobby", TriggerMode::Fanout)
        .with_member("alice", MemberKind::Human)
        .with_member("bot", MemberKind::Agent)
        .with_member("helper", MemberKind::Agent);
    let back = Space::new("backroom", TriggerMode::None).with_member("helper", MemberKind::Agent);
    let spaces = Arc::new(MemorySpaceDirectory::with_spaces([lobby, back]));
    let log = Arc::new(MemorySpaceLog::new());
    let bus = Arc::new(MemoryEventBus::new());
    let plans = Arc::new(MemoryPlanStore::new());
    Fixture {
        services: ToolServices {
            spaces,
            log: log.clone(),
            bus: bus.clone(),
            plans: plans.clone(),
        },
        log,
        bus,
        plans,
    }
}

fn ctx(f: &Fixture, active: Option<&str>) -> ToolContext {
    ToolContext::new(
        EntityId::new("bot"),
        RunId::generate(),
        f.services.clone(),
        active.map(SpaceId::new),
    )
}

// ===========================================================================
// ToolResult
// ===========================================================================

#[test]
fn tool_result_outputs() {
    assert_eq!(ToolResult::text("hi").to_output(), json!("hi"));
    assert_eq!(
        ToolResult::error("boom").to_output(),
        json!({"error": "boom"})
    );
    assert_eq!(ToolResult::Pending.to_output(), json!({"status": "pending"}));
    assert!(ToolResult::error("x").is_error());
    assert!(ToolResult::Pending.is_pending());
    assert!(!ToolResult::Json(json!({})).is_error());
}

// ===========================================================================
// ToolRegistry
// ===========================================================================

#[test]
fn default_registry_has_core_tools_sorted() {
    let reg = create_default_registry(&[]);
    assert_eq!(
        reg.list(),
        vec!["cancel_plan", "enter_space", "send_message", "set_plan", "skip"]
    );
    let defs = reg.get_definitions();
    assert_eq!(defs.len(), 5);
    assert_eq!(defs[0].name, "cancel_plan");
    assert!(defs.iter().all(|d| d.input_schema["type"] == "object"));
    assert!(reg.combined_prompts().contains("send_message"));
}

#[test]
fn external_tools_are_registered_but_never_shadow_builtins() {
    let reg = create_default_registry(&[
        ExternalToolSpec {
            name: "render_chart".into(),
            description: "Render a chart on the client".into(),
            input_schema: json!({"type": "object"}),
        },
        ExternalToolSpec {
            name: "skip".into(),
            description: "impostor".into(),
            input_schema: json!({"type": "object"}),
        },
    ]);
    assert!(reg.is_external("render_chart"));
    assert!(!reg.is_external("skip"));
    assert_eq!(reg.list().len(), 6);
}

#[test]
fn external_spec_defaults_from_toml_shape() {
    let spec: ExternalToolSpec = serde_json::from_value(json!({"name": "ask_user"})).unwrap();
    assert_eq!(spec.input_schema["type"], "object");
    assert!(spec.description.is_empty());
}

#[tokio::test]
async fn registry_execute_missing_tool() {
    let f = fixture();
    let reg = ToolRegistry::new();
    let result = reg.execute("nope", json!({}), &ctx(&f, None)).await;
    assert!(result.is_error());
}

#[tokio::test]
async fn external_tool_is_pending() {
    let f = fixture();
    let reg = create_default_registry(&[ExternalToolSpec {
        name: "ask_user".into(),
        description: String::new(),
        input_schema: json!({"type": "object"}),
    }]);
    let result = reg
        .execute("ask_user", json!({"q": "?"}), &ctx(&f, None))
        .await;
    assert!(result.is_pending());
}

// ===========================================================================
// send_message
// ===========================================================================

#[tokio::test]
async fn send_message_to_active_space() {
    let f = fixture();
    let c = ctx(&f, Some("lobby"));
    let mut rx = f.bus.subscribe_space(&SpaceId::new("lobby"));
    let reg = create_default_registry(&[]);

    let result = reg
        .execute(SEND_MESSAGE, json!({"text": "hello all"}), &c)
        .await;
    let ToolResult::Json(out) = result else {
        panic!("expected json result");
    };
    assert_eq!(out["spaceId"], "lobby");

    let posted = f.log.recent(&SpaceId::new("lobby"), 10).await.unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].content, "hello all");
    assert_eq!(posted[0].sender_kind, MemberKind::Agent);
    assert_eq!(posted[0].run_id.as_ref(), Some(&c.run_id));
    assert_eq!(out["messageId"], posted[0].id.as_str());

    let event = rx.recv().await.unwrap();
    assert_eq!(event.name(), "space.message");

    let effects = c.effects().await;
    assert_eq!(effects.posts.len(), 1);
    assert!(effects.mentions.is_empty());
}

#[tokio::test]
async fn send_message_without_space_fails() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    let result = reg.execute(SEND_MESSAGE, json!({"text": "anyone?"}), &c).await;
    assert!(result.is_error());
    assert!(c.effects().await.posts.is_empty());
}

#[tokio::test]
async fn send_message_rejects_non_member_space() {
    let f = fixture();
    let c = ctx(&f, Some("lobby"));
    let reg = create_default_registry(&[]);
    let result = reg
        .execute(
            SEND_MESSAGE,
            json!({"spaceId": "backroom", "text": "let me in"}),
            &c,
        )
        .await;
    assert!(result.is_error());
    assert!(f
        .log
        .recent(&SpaceId::new("backroom"), 10)
        .await
        .unwrap()
        .is_empty());
    // active space untouched
    assert_eq!(c.active_space().await, Some(SpaceId::new("lobby")));
}

#[tokio::test]
async fn send_message_requires_text() {
    let f = fixture();
    let c = ctx(&f, Some("lobby"));
    let reg = create_default_registry(&[]);
    assert!(reg
        .execute(SEND_MESSAGE, json!({"text": "   "}), &c)
        .await
        .is_error());
}

#[tokio::test]
async fn send_message_records_mention() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    let result = reg
        .execute(
            SEND_MESSAGE,
            json!({
                "spaceId": "lobby",
                "text": "@helper can you check this?",
                "mention": {"entityId": "helper", "reason": "need approval", "expectReply": true}
            }),
            &c,
        )
        .await;
    assert!(!result.is_error());

    let effects = c.effects().await;
    assert_eq!(effects.active_space, Some(SpaceId::new("lobby")));
    assert_eq!(effects.mentions.len(), 1);
    let m = &effects.mentions[0];
    assert_eq!(m.callee.as_str(), "helper");
    assert_eq!(m.reason, "need approval");
    assert!(m.expect_reply);
    assert_eq!(m.message_id, effects.posts[0].id);
}

#[tokio::test]
async fn malformed_mention_posts_nothing() {
    let f = fixture();
    let c = ctx(&f, Some("lobby"));
    let reg = create_default_registry(&[]);
    let result = reg
        .execute(
            SEND_MESSAGE,
            json!({"text": "hi", "mention": {"reason": "who?"}}),
            &c,
        )
        .await;
    assert!(result.is_error());
    assert!(f.log.recent(&SpaceId::new("lobby"), 10).await.unwrap().is_empty());
}

// ===========================================================================
// enter_space / skip
// ===========================================================================

#[tokio::test]
async fn enter_space_switches_active_space() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    assert!(!reg
        .execute(ENTER_SPACE, json!({"spaceId": "lobby"}), &c)
        .await
        .is_error());
    assert_eq!(c.active_space().await, Some(SpaceId::new("lobby")));

    assert!(reg
        .execute(ENTER_SPACE, json!({"spaceId": "backroom"}), &c)
        .await
        .is_error());
    assert_eq!(c.active_space().await, Some(SpaceId::new("lobby")));
}

#[tokio::test]
async fn skip_marks_cycle() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    reg.execute(SKIP, json!({"reason": "not for me"}), &c).await;
    assert!(c.effects().await.skipped);
}

// ===========================================================================
// Plans
// ===========================================================================

#[tokio::test]
async fn set_plan_cron_computes_next_run() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    let result = reg
        .execute(
            "set_plan",
            json!({"instruction": "post the daily summary", "cron": "0 9 * * *"}),
            &c,
        )
        .await;
    let ToolResult::Json(out) = result else {
        panic!("expected json, got {result:?}");
    };
    let plans = f.plans.list(&EntityId::new("bot")).await.unwrap();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(out["planId"], plan.id.as_str());
    assert_eq!(plan.status, PlanStatus::Pending);
    let next = plan.next_run_at.unwrap();
    assert!(next > chrono::Utc::now());
    assert_eq!(next.format("%H:%M").to_string(), "09:00");
}

#[tokio::test]
async fn set_plan_once_and_edit() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    reg.execute(
        "set_plan",
        json!({"instruction": "remind", "runAt": "2030-01-01T10:00:00Z"}),
        &c,
    )
    .await;
    let plan = f.plans.list(&EntityId::new("bot")).await.unwrap().remove(0);
    assert_eq!(
        plan.next_run_at.unwrap().to_rfc3339(),
        "2030-01-01T10:00:00+00:00"
    );

    reg.execute(
        "set_plan",
        json!({"planId": plan.id, "instruction": "remind louder", "runAt": "2030-01-02T10:00:00Z"}),
        &c,
    )
    .await;
    let plans = f.plans.list(&EntityId::new("bot")).await.unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].instruction, "remind louder");
    assert_eq!(plans[0].created_at, plan.created_at);
}

#[tokio::test]
async fn set_plan_validation() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    for args in [
        json!({"instruction": "x"}),
        json!({"instruction": "x", "cron": "* * * * *", "runAt": "2030-01-01T00:00:00Z"}),
        json!({"instruction": "x", "runAt": "tomorrow"}),
        json!({"instruction": "x", "cron": "not a cron"}),
        json!({"cron": "* * * * *"}),
        json!({"instruction": "x", "cron": "* * * * *", "planId": "ghost"}),
    ] {
        assert!(
            reg.execute("set_plan", args.clone(), &c).await.is_error(),
            "accepted {args}"
        );
    }
    assert!(f.plans.list(&EntityId::new("bot")).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_plan_only_own() {
    let f = fixture();
    let c = ctx(&f, None);
    let reg = create_default_registry(&[]);
    reg.execute(
        "set_plan",
        json!({"instruction": "x", "cron": "*/5 * * * *"}),
        &c,
    )
    .await;
    let plan = f.plans.list(&EntityId::new("bot")).await.unwrap().remove(0);

    let stranger = ToolContext::new(
        EntityId::new("helper"),
        RunId::generate(),
        f.services.clone(),
        None,
    );
    assert!(reg
        .execute("cancel_plan", json!({"planId": plan.id}), &stranger)
        .await
        .is_error());

    assert!(!reg
        .execute("cancel_plan", json!({"planId": plan.id}), &c)
        .await
        .is_error());
    let plan = f.plans.get(&plan.id).await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Canceled);
    assert!(plan.next_run_at.is_none());
}

#[test]
fn next_run_after_once_and_cron() {
    let at = chrono::DateTime::parse_from_rfc3339("2030-01-01T10:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let once = PlanSchedule::Once { run_at: at };
    assert_eq!(next_run_after(&once, chrono::Utc::now()).unwrap(), Some(at));

    let hourly = PlanSchedule::Cron {
        expression: "0 * * * *".into(),
    };
    let next = next_run_after(&hourly, at).unwrap().unwrap();
    assert_eq!(next.to_rfc3339(), "2030-01-01T11:00:00+00:00");

    let bad = PlanSchedule::Cron {
        expression: "nonsense".into(),
    };
    assert!(matches!(
        next_run_after(&bad, at).unwrap_err(),
        Error::InvalidInput(_)
    ));
}
