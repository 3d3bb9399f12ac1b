//! Tests for agora-store: inbox contract, record stores, spaces, bus, consciousness repos

use agora_core::*;
use agora_llm::Message;
use agora_store::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn plan_event(entity: &str, instruction: &str) -> InboxEvent {
    InboxEvent::new(
        EntityId::new(entity),
        InboxPayload::Plan(PlanTrigger {
            plan_id: PlanId::generate(),
            instruction: instruction.into(),
        }),
    )
}

fn ids(events: &[InboxEvent]) -> Vec<EventId> {
    events.iter().map(|e| e.id.clone()).collect()
}

// ===========================================================================
// Inbox: FIFO and drain
// ===========================================================================

#[tokio::test]
async fn drain_returns_all_in_arrival_order() {
    let inbox = MemoryInbox::new();
    let entity = EntityId::new("e1");
    let mut pushed = Vec::new();
    for i in 0..10 {
        let outcome = inbox.push(plan_event("e1", &format!("p{i}"))).await.unwrap();
        pushed.push(outcome.event_id().clone());
    }

    let drained = inbox.drain_all(&entity).await.unwrap();
    assert_eq!(ids(&drained), pushed);
    assert!(inbox.drain_all(&entity).await.unwrap().is_empty());
}

#[tokio::test]
async fn drain_is_scoped_to_entity() {
    let inbox = MemoryInbox::new();
    inbox.push(plan_event("a", "x")).await.unwrap();
    inbox.push(plan_event("b", "y")).await.unwrap();

    let drained = inbox.drain_all(&EntityId::new("a")).await.unwrap();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].entity_id.as_str(), "a");
    assert_eq!(inbox.queued_len(&EntityId::new("b")).await.unwrap(), 1);
}

#[tokio::test]
async fn drain_on_empty_does_not_block() {
    let inbox = MemoryInbox::new();
    let drained = tokio::time::timeout(
        Duration::from_millis(100),
        inbox.drain_all(&EntityId::new("nobody")),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(drained.is_empty());
}

// ===========================================================================
// Inbox: blocking wait
// ===========================================================================

#[tokio::test]
async fn wait_returns_immediately_when_queued() {
    let inbox = MemoryInbox::new();
    inbox.push(plan_event("e1", "now")).await.unwrap();
    let cancel = CancellationToken::new();
    assert!(inbox
        .wait_for_next(&EntityId::new("e1"), &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn wait_is_woken_by_push() {
    let inbox = Arc::new(MemoryInbox::new());
    let cancel = CancellationToken::new();

    let waiter = {
        let inbox = inbox.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { inbox.wait_for_next(&EntityId::new("e1"), &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    inbox.push(plan_event("e1", "wake")).await.unwrap();

    let woke = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(woke);
}

#[tokio::test]
async fn wait_honors_cancellation() {
    let inbox = Arc::new(MemoryInbox::new());
    let cancel = CancellationToken::new();

    let waiter = {
        let inbox = inbox.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { inbox.wait_for_next(&EntityId::new("e1"), &cancel).await })
    };
    cancel.cancel();

    let woke = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!woke);
}

#[tokio::test]
async fn push_to_other_entity_does_not_wake() {
    let inbox = Arc::new(MemoryInbox::new());
    let cancel = CancellationToken::new();
    let waiter = {
        let inbox = inbox.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { inbox.wait_for_next(&EntityId::new("e1"), &cancel).await })
    };
    inbox.push(plan_event("e2", "not yours")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());
    cancel.cancel();
    assert!(!waiter.await.unwrap().unwrap());
}

// ===========================================================================
// Inbox: status mirror and recovery
// ===========================================================================

#[tokio::test]
async fn status_transitions_are_mirrored() {
    let inbox = MemoryInbox::new();
    let entity = EntityId::new("e1");
    inbox.push(plan_event("e1", "a")).await.unwrap();
    inbox.push(plan_event("e1", "b")).await.unwrap();
    let batch = inbox.drain_all(&entity).await.unwrap();
    let run_id = RunId::generate();

    inbox.mark_processing(&ids(&batch), &run_id).await.unwrap();
    let first = inbox.get(&batch[0].id).await.unwrap().unwrap();
    assert_eq!(first.status, InboxStatus::Processing);
    assert_eq!(first.linked_run_id.as_ref(), Some(&run_id));

    inbox.mark_processed(&ids(&batch[..1])).await.unwrap();
    inbox.mark_failed(&ids(&batch[1..])).await.unwrap();
    let all = inbox.list(&entity).await.unwrap();
    assert_eq!(all[0].status, InboxStatus::Processed);
    assert_eq!(all[1].status, InboxStatus::Failed);
}

#[tokio::test]
async fn mark_unknown_event_is_not_found() {
    let inbox = MemoryInbox::new();
    let err = inbox
        .mark_processed(&[EventId::new("ghost")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn recover_stuck_requeues_processing_in_order() {
    let inbox = MemoryInbox::new();
    let entity = EntityId::new("e1");
    for i in 0..3 {
        inbox.push(plan_event("e1", &format!("{i}"))).await.unwrap();
    }
    let batch = inbox.drain_all(&entity).await.unwrap();
    inbox
        .mark_processing(&ids(&batch), &RunId::generate())
        .await
        .unwrap();
    // simulated crash: a newer event arrives before restart
    let late = inbox.push(plan_event("e1", "late")).await.unwrap();

    assert_eq!(inbox.recover_stuck(&entity).await.unwrap(), 3);
    let drained = inbox.drain_all(&entity).await.unwrap();
    let mut expected = ids(&batch);
    expected.push(late.event_id().clone());
    assert_eq!(ids(&drained), expected);
    assert!(drained.iter().all(|e| e.status == InboxStatus::Pending));
    assert!(drained.iter().all(|e| e.linked_run_id.is_none()));

    assert_eq!(inbox.recover_stuck(&entity).await.unwrap(), 0);
}

#[tokio::test]
async fn reset_pending_does_not_requeue() {
    let inbox = MemoryInbox::new();
    let entity = EntityId::new("e1");
    inbox.push(plan_event("e1", "a")).await.unwrap();
    let batch = inbox.drain_all(&entity).await.unwrap();
    inbox
        .mark_processing(&ids(&batch), &RunId::generate())
        .await
        .unwrap();

    inbox.reset_pending(&ids(&batch)).await.unwrap();
    assert_eq!(inbox.queued_len(&entity).await.unwrap(), 0);
    let event = inbox.get(&batch[0].id).await.unwrap().unwrap();
    assert_eq!(event.status, InboxStatus::Pending);
}

// ===========================================================================
// Inbox: dedup keys and outages
// ===========================================================================

#[tokio::test]
async fn dedup_key_collapses_unfinished_duplicates() {
    let inbox = MemoryInbox::new();
    let entity = EntityId::new("e1");
    let first = inbox
        .push(plan_event("e1", "a").with_dedup_key("msg:1"))
        .await
        .unwrap();
    let second = inbox
        .push(plan_event("e1", "a again").with_dedup_key("msg:1"))
        .await
        .unwrap();
    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(first.event_id(), second.event_id());
    assert_eq!(inbox.queued_len(&entity).await.unwrap(), 1);

    // other entities keep their own key space
    let other = inbox
        .push(plan_event("e2", "a").with_dedup_key("msg:1"))
        .await
        .unwrap();
    assert!(!other.is_duplicate());
}

#[tokio::test]
async fn dedup_key_reusable_after_processing_finishes() {
    let inbox = MemoryInbox::new();
    let entity = EntityId::new("e1");
    inbox
        .push(plan_event("e1", "a").with_dedup_key("k"))
        .await
        .unwrap();
    let batch = inbox.drain_all(&entity).await.unwrap();
    inbox
        .mark_processing(&ids(&batch), &RunId::generate())
        .await
        .unwrap();
    inbox.mark_processed(&ids(&batch)).await.unwrap();

    let again = inbox
        .push(plan_event("e1", "a").with_dedup_key("k"))
        .await
        .unwrap();
    assert!(!again.is_duplicate());
}

#[tokio::test]
async fn push_surfaces_store_outage() {
    let inbox = MemoryInbox::new();
    inbox.set_available(false);
    let err = inbox.push(plan_event("e1", "lost?")).await.unwrap_err();
    assert!(err.is_transient());
    assert!(inbox.list(&EntityId::new("e1")).await.unwrap().is_empty());

    inbox.set_available(true);
    assert!(inbox.push(plan_event("e1", "retry")).await.is_ok());
}

// ===========================================================================
// Runs
// ===========================================================================

fn message_run(entity: &str, message: &str) -> Run {
    Run::new(
        EntityId::new(entity),
        TriggerMetadata {
            trigger_type: InboxEventType::SpaceMessage,
            event_ids: vec![EventId::generate()],
            space_id: Some(SpaceId::new("lobby")),
            message_ids: vec![MessageId::new(message)],
            chain: None,
        },
    )
}

#[tokio::test]
async fn run_dedup_guard_per_agent_and_message() {
    let runs = MemoryRunStore::new();
    runs.create(message_run("a", "m1")).await.unwrap();

    let dup = runs.create(message_run("a", "m1")).await.unwrap_err();
    assert!(matches!(dup, Error::InvalidState(_)));
    // different agent, same message is fine
    runs.create(message_run("b", "m1")).await.unwrap();
    assert!(runs
        .has_run_for_message(&EntityId::new("a"), &MessageId::new("m1"))
        .await
        .unwrap());
}

#[tokio::test]
async fn run_dedup_covers_every_batch_message() {
    let runs = MemoryRunStore::new();
    let mut batch = message_run("a", "m1");
    batch.trigger.message_ids.push(MessageId::new("m2"));
    runs.create(batch).await.unwrap();

    assert!(runs
        .has_run_for_message(&EntityId::new("a"), &MessageId::new("m2"))
        .await
        .unwrap());
    assert!(matches!(
        runs.create(message_run("a", "m2")).await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn canceled_run_frees_the_message() {
    let runs = MemoryRunStore::new();
    let mut run = message_run("a", "m1");
    runs.create(run.clone()).await.unwrap();
    run.status = RunStatus::Canceled;
    runs.update(run).await.unwrap();

    assert!(!runs
        .has_run_for_message(&EntityId::new("a"), &MessageId::new("m1"))
        .await
        .unwrap());
    runs.create(message_run("a", "m1")).await.unwrap();
}

#[tokio::test]
async fn run_list_filters_newest_first() {
    let runs = MemoryRunStore::new();
    let mut older = message_run("a", "m1");
    older.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
    let mut failed = message_run("a", "m2");
    failed.status = RunStatus::Failed;
    let other = message_run("b", "m3");
    for run in [older.clone(), failed.clone(), other] {
        runs.create(run).await.unwrap();
    }

    let listed = runs.list(&RunFilter::for_entity("a")).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, failed.id);
    assert_eq!(listed[1].id, older.id);

    let only_failed = runs
        .list(&RunFilter {
            status: Some(RunStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(only_failed.len(), 1);

    let limited = runs
        .list(&RunFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn run_delete_and_missing_update() {
    let runs = MemoryRunStore::new();
    let run = message_run("a", "m1");
    runs.create(run.clone()).await.unwrap();
    runs.delete(&run.id).await.unwrap();
    assert!(runs.get(&run.id).await.unwrap().is_none());
    assert!(matches!(
        runs.update(run).await.unwrap_err(),
        Error::NotFound { .. }
    ));
}

// ===========================================================================
// Plans
// ===========================================================================

#[tokio::test]
async fn due_plans_are_pending_and_past() {
    let plans = MemoryPlanStore::new();
    let now = chrono::Utc::now();
    let mk = |status, offset: i64| Plan {
        id: PlanId::generate(),
        entity_id: EntityId::new("a"),
        schedule: PlanSchedule::Once {
            run_at: now + chrono::Duration::seconds(offset),
        },
        instruction: "check".into(),
        status,
        next_run_at: Some(now + chrono::Duration::seconds(offset)),
        last_run_at: None,
        created_at: now,
    };
    let due = mk(PlanStatus::Pending, -5);
    plans.upsert(due.clone()).await.unwrap();
    plans.upsert(mk(PlanStatus::Pending, 60)).await.unwrap();
    plans.upsert(mk(PlanStatus::Canceled, -5)).await.unwrap();

    let found = plans.due(now).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, due.id);
    assert_eq!(plans.list(&EntityId::new("a")).await.unwrap().len(), 3);
}

// ===========================================================================
// Spaces
// ===========================================================================

#[tokio::test]
async fn round_robin_cursor_is_atomic() {
    let dir = Arc::new(MemorySpaceDirectory::with_spaces([Space::new(
        "lobby",
        TriggerMode::RoundRobin,
    )]));
    let mut handles = Vec::new();
    for _ in 0..50 {
        let dir = dir.clone();
        handles.push(tokio::spawn(async move {
            dir.next_round_robin(&SpaceId::new("lobby")).await.unwrap()
        }));
    }
    let mut seen = Vec::new();
    for h in handles {
        seen.push(h.await.unwrap());
    }
    seen.sort();
    assert_eq!(seen, (0..50).collect::<Vec<u64>>());
}

#[tokio::test]
async fn membership_queries() {
    let space = Space::new("lobby", TriggerMode::Fanout)
        .with_member("alice", MemberKind::Human)
        .with_member("bot", MemberKind::Agent);
    let dir = MemorySpaceDirectory::with_spaces([space]);
    let lobby = SpaceId::new("lobby");

    assert!(dir.is_agent_member(&lobby, &EntityId::new("bot")).await.unwrap());
    assert!(!dir.is_agent_member(&lobby, &EntityId::new("alice")).await.unwrap());
    assert!(dir.is_member(&lobby, &EntityId::new("alice")).await.unwrap());
    assert!(!dir.is_member(&SpaceId::new("nowhere"), &EntityId::new("bot")).await.unwrap());

    dir.add_member(
        &lobby,
        Member {
            entity_id: EntityId::new("bot2"),
            kind: MemberKind::Agent,
            display_name: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(dir.spaces_of(&EntityId::new("bot2")).await.unwrap(), vec![lobby]);
}

#[tokio::test]
async fn space_log_recent_window() {
    let log = MemorySpaceLog::new();
    let space = SpaceId::new("lobby");
    for i in 0..5 {
        log.append(SpaceMessage::new(
            space.clone(),
            EntityId::new("alice"),
            MemberKind::Human,
            format!("m{i}"),
        ))
        .await
        .unwrap();
    }
    let recent = log.recent(&space, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].content, "m3");
    assert_eq!(recent[1].content, "m4");
    let found = log.get(&recent[0].id).await.unwrap().unwrap();
    assert_eq!(found.content, "m3");
}

// ===========================================================================
// Event bus
// ===========================================================================

#[tokio::test]
async fn space_events_reach_subscribers() {
    let bus = MemoryEventBus::new();
    let lobby = SpaceId::new("lobby");
    let mut rx = bus.subscribe_space(&lobby);
    bus.publish_space(
        &lobby,
        SpaceEvent::StreamDelta {
            stream_id: "c1".into(),
            delta: "Hi".into(),
        },
    )
    .await;
    bus.publish_space(
        &SpaceId::new("elsewhere"),
        SpaceEvent::StreamEnd {
            stream_id: "c2".into(),
        },
    )
    .await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.name(), "message.stream.delta");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn run_events_are_recorded() {
    let bus = MemoryEventBus::new();
    let run = RunId::generate();
    let mut rx = bus.subscribe_runs();
    bus.publish_run(&run, RunEvent::Failed { error: "x".into() })
        .await;

    assert_eq!(bus.run_events(&run).await.len(), 1);
    let (id, event) = rx.recv().await.unwrap();
    assert_eq!(id, run);
    assert_eq!(event.name(), "run.failed");

    bus.forget_run(&run).await;
    assert!(bus.run_events(&run).await.is_empty());
}

// ===========================================================================
// Consciousness repositories
// ===========================================================================

#[tokio::test]
async fn file_repo_roundtrip_and_missing() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileConsciousnessRepo::new(dir.path().join("minds"));
    let entity = EntityId::new("agent/one");

    let empty = repo.load(&entity).await.unwrap();
    assert!(empty.messages.is_empty());
    assert_eq!(empty.cycle_count, 0);

    let record = ConsciousnessRecord {
        entity_id: entity.clone(),
        messages: vec![Message::system("you are one"), Message::user("[inbox] hi")],
        cycle_count: 7,
        updated_at: Some(chrono::Utc::now()),
    };
    repo.save(&record).await.unwrap();

    let path = repo.path_for(&entity);
    assert!(path.ends_with("agent_one.json"));
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
    assert_eq!(repo.load(&entity).await.unwrap(), record);
}

#[tokio::test]
async fn file_repo_rejects_corrupt_document() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileConsciousnessRepo::new(dir.path());
    let entity = EntityId::new("a");
    std::fs::write(repo.path_for(&entity), "{not json").unwrap();
    assert!(matches!(
        repo.load(&entity).await.unwrap_err(),
        Error::JsonError(_)
    ));
}

#[tokio::test]
async fn memory_repo_outage() {
    let repo = MemoryConsciousnessRepo::new();
    let record = ConsciousnessRecord::empty(EntityId::new("a"));
    repo.set_available(false);
    assert!(repo.save(&record).await.is_err());
    repo.set_available(true);
    repo.save(&record).await.unwrap();
    assert_eq!(repo.load(&EntityId::new("a")).await.unwrap(), record);
}
