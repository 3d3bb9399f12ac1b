//! Agent process: the per-entity sleep/drain/think/persist loop
//!
//! One `AgentProcess` runs per agent on its own task, one cycle at a time.
//! It blocks on the inbox, drains everything queued into one batch, opens a
//! Run, thinks through a `ThinkSession` while a `StreamProcessor` relays the
//! live events, then either rolls the whole cycle back (skip), or persists
//! the new turns and hands off to the mention protocol. A failed cycle marks
//! its Run and events failed, pauses, and the loop carries on.

use crate::config::{ActiveSpacePolicy, AgentConfig, AgoraConfig, ProcessConfig};
use crate::consciousness::{
    inbox_turn, last_active_space, refresh_system_prompt, timeline_note, ConsciousnessStore,
};
use crate::error::{CycleError, CycleResult};
use crate::mention::{Mention, MentionProtocol};
use crate::prompt::PromptBuilder;
use crate::session::ThinkSession;
use crate::stores::Stores;
use crate::stream::{StreamOutcome, StreamProcessor};
use agora_core::{
    EntityId, Error, EventId, InboxEvent, InboxPayload, MentionChain, MessageId, PendingToolCall,
    Run, RunEvent, RunId, RunStatus, Space, SpaceEvent, SpaceId, TriggerMetadata,
};
use agora_llm::LlmProvider;
use agora_tools::{CycleEffects, ToolContext, ToolRegistry};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one pass through the loop ended.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// Nothing to do: empty batch, or every event was already handled.
    Idle,
    /// The agent skipped; nothing of the cycle survives.
    Skipped { run_id: RunId },
    Finished { run_id: RunId, status: RunStatus },
    Failed { run_id: Option<RunId>, error: String },
}

pub struct AgentProcess {
    agent: AgentConfig,
    model: String,
    config: ProcessConfig,
    stores: Stores,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    prompt: Arc<dyn PromptBuilder>,
    mentions: MentionProtocol,
    consciousness: ConsciousnessStore,
    /// Advisory pointer; only carried between cycles under `Persist`.
    active_space: Option<SpaceId>,
}

impl AgentProcess {
    pub fn new(
        agent: AgentConfig,
        config: &AgoraConfig,
        stores: Stores,
        provider: Arc<dyn LlmProvider>,
        prompt: Arc<dyn PromptBuilder>,
    ) -> Self {
        let tools = Arc::new(agora_tools::create_default_registry(&agent.external_tools));
        let mentions = MentionProtocol::new(
            stores.inbox.clone(),
            stores.spaces.clone(),
            stores.runs.clone(),
            config.mention.clone(),
        );
        let consciousness = ConsciousnessStore::new(
            stores.consciousness.clone(),
            config.process.max_consciousness_tokens,
            config.process.min_retained_cycles,
        );
        Self {
            model: config.model_for(&agent),
            agent,
            config: config.process.clone(),
            stores,
            provider,
            tools,
            prompt,
            mentions,
            consciousness,
            active_space: None,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.agent.id
    }

    pub fn active_space(&self) -> Option<&SpaceId> {
        self.active_space.as_ref()
    }

    /// Startup: re-queue events a crash left in `processing`, and under
    /// `Persist` restore the active space from history.
    pub async fn restore(&mut self) -> CycleResult<usize> {
        let recovered = self.stores.inbox.recover_stuck(&self.agent.id).await?;
        if recovered > 0 {
            warn!(entity = %self.agent.id, recovered, "re-queued events left processing");
        }
        if self.config.active_space_policy == ActiveSpacePolicy::Persist {
            let record = self.consciousness.load(&self.agent.id).await?;
            self.active_space = last_active_space(&record.messages);
            debug!(entity = %self.agent.id, space = ?self.active_space, "active space restored");
        }
        Ok(recovered)
    }

    /// Loop until `cancel` fires. Cancellation is only observed while idle.
    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.restore().await {
            error!(entity = %self.agent.id, "restore failed: {}", e);
        }
        info!(entity = %self.agent.id, model = %self.model, "agent process started");

        loop {
            match self.stores.inbox.wait_for_next(&self.agent.id, &cancel).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(entity = %self.agent.id, "inbox wait failed: {}", e);
                    if self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            }
            if let CycleOutcome::Failed { .. } = self.run_once().await {
                if self.pause(&cancel).await {
                    break;
                }
            }
        }
        info!(entity = %self.agent.id, "agent process stopped");
    }

    /// Sleep after a failure. Returns true if cancelled meanwhile.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(self.config.error_pause_ms)) => false,
            _ = cancel.cancelled() => true,
        }
    }

    /// Drain the inbox and run one cycle over whatever was queued.
    pub async fn run_once(&mut self) -> CycleOutcome {
        let batch = match self.stores.inbox.drain_all(&self.agent.id).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(entity = %self.agent.id, "drain failed: {}", e);
                return CycleOutcome::Failed {
                    run_id: None,
                    error: e.to_string(),
                };
            }
        };
        let drained: Vec<EventId> = batch.iter().map(|e| e.id.clone()).collect();
        let batch = match self.drop_handled(batch).await {
            Ok(batch) => batch,
            Err(e) => return self.fail_unopened(&drained, e.into()).await,
        };
        if batch.is_empty() {
            return CycleOutcome::Idle;
        }
        let ids: Vec<EventId> = batch.iter().map(|e| e.id.clone()).collect();

        let run = match self.open_run(&batch).await {
            Ok(Some(run)) => run,
            Ok(None) => return CycleOutcome::Idle,
            Err(e) => return self.fail_unopened(&ids, e).await,
        };

        match self.think(&run, &batch).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail(run, &ids, e).await,
        }
    }

    /// Events for a message this agent already has a Run for are retired
    /// without a cycle.
    async fn drop_handled(&self, batch: Vec<InboxEvent>) -> agora_core::Result<Vec<InboxEvent>> {
        let mut kept = Vec::with_capacity(batch.len());
        let mut handled = Vec::new();
        for event in batch {
            let taken = match event.triggering_message_id() {
                Some(message_id) => {
                    self.stores
                        .runs
                        .has_run_for_message(&self.agent.id, message_id)
                        .await?
                }
                None => false,
            };
            if taken {
                handled.push(event.id);
            } else {
                kept.push(event);
            }
        }
        if !handled.is_empty() {
            debug!(entity = %self.agent.id, count = handled.len(), "already handled, retired");
            self.stores.inbox.mark_processed(&handled).await?;
        }
        Ok(kept)
    }

    /// Create the Run for a batch. `None` when another Run already claimed
    /// one of its messages.
    async fn open_run(&self, batch: &[InboxEvent]) -> CycleResult<Option<Run>> {
        let first = &batch[0];
        let chain = batch_chain(batch)
            .map(|(chain, _)| chain.clone())
            .unwrap_or_else(MentionChain::fresh);
        let mut message_ids: Vec<MessageId> = Vec::new();
        for id in batch.iter().filter_map(InboxEvent::triggering_message_id) {
            if !message_ids.contains(id) {
                message_ids.push(id.clone());
            }
        }
        let trigger = TriggerMetadata {
            trigger_type: first.event_type(),
            event_ids: batch.iter().map(|e| e.id.clone()).collect(),
            space_id: first.space_id().cloned(),
            message_ids,
            chain: Some(chain),
        };
        let mut run = Run::new(self.agent.id.clone(), trigger);
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());

        match self.stores.runs.create(run.clone()).await {
            Ok(()) => Ok(Some(run)),
            Err(Error::InvalidState(reason)) => {
                debug!(entity = %self.agent.id, "run not opened: {}", reason);
                let ids: Vec<EventId> = batch.iter().map(|e| e.id.clone()).collect();
                self.stores.inbox.mark_processed(&ids).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn member_spaces(&self) -> CycleResult<Vec<Space>> {
        let mut spaces = Vec::new();
        for id in self.stores.spaces.spaces_of(&self.agent.id).await? {
            if let Some(space) = self.stores.spaces.get(&id).await? {
                spaces.push(space);
            }
        }
        Ok(spaces)
    }

    async fn think(&mut self, run: &Run, batch: &[InboxEvent]) -> CycleResult<CycleOutcome> {
        let started = Instant::now();
        let ids = &run.trigger.event_ids;
        self.stores.inbox.mark_processing(ids, &run.id).await?;

        let mut record = self.consciousness.load(&self.agent.id).await?;
        let trigger_space = batch.iter().find_map(|e| e.space_id().cloned());
        let active = match self.config.active_space_policy {
            ActiveSpacePolicy::ResetPerCycle => trigger_space.clone(),
            ActiveSpacePolicy::Persist => trigger_space.clone().or_else(|| self.active_space.clone()),
        };

        info!(
            entity = %self.agent.id,
            run = %run.id,
            trigger = %run.trigger.trigger_type,
            events = batch.len(),
            "cycle started"
        );
        self.stores
            .bus
            .publish_run(
                &run.id,
                RunEvent::Started {
                    entity_id: self.agent.id.clone(),
                    trigger_type: run.trigger.trigger_type,
                },
            )
            .await;
        self.announce(run.trigger.space_id.as_ref(), &run.id, true).await;

        let spaces = self.member_spaces().await?;
        let prompt = self.prompt.build(&self.agent, &spaces, &self.tools);
        let mut history = record.messages.clone();
        refresh_system_prompt(&mut history, &prompt);
        history.push(inbox_turn(batch, Utc::now()));

        let ctx = Arc::new(ToolContext::new(
            self.agent.id.clone(),
            run.id.clone(),
            self.stores.tool_services(),
            active,
        ));
        let session = ThinkSession {
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            ctx: ctx.clone(),
            inbox: self.stores.inbox.clone(),
            model: self.model.clone(),
            max_output_tokens: self.config.max_output_tokens,
            max_steps: self.config.max_steps,
        };
        let (events, handle) = session.spawn(history.clone());
        let streamed = StreamProcessor::new(ctx.clone()).run(events).await;
        let mut result = handle
            .await
            .map_err(|e| CycleError::Session(e.to_string()))??;

        if result.skipped {
            self.rollback(run).await?;
            self.announce(run.trigger.space_id.as_ref(), &run.id, false).await;
            info!(entity = %self.agent.id, run = %run.id, "cycle skipped, rolled back");
            return Ok(CycleOutcome::Skipped {
                run_id: run.id.clone(),
            });
        }

        history.extend(result.turns.drain(..));
        history.push(timeline_note(Utc::now(), started.elapsed(), &result.tools_used));
        record.messages = history;
        self.consciousness.compact(&mut record);
        record.cycle_count += 1;
        record.updated_at = Some(Utc::now());
        self.consciousness.save(&record).await?;

        let status = self.finish_run(run, &result, &streamed).await?;
        self.stores.inbox.mark_processed(ids).await?;

        let effects = ctx.effects().await;
        if self.config.active_space_policy == ActiveSpacePolicy::Persist {
            self.active_space = effects.active_space.clone();
        }
        let chain = run.trigger.chain.clone().unwrap_or_default();
        let chain_space = batch_chain(batch)
            .map(|(_, space)| space.clone())
            .or(trigger_space);
        if let Err(e) = self.hand_off(&chain, &effects, chain_space.as_ref()).await {
            warn!(entity = %self.agent.id, run = %run.id, "mention hand-off failed: {}", e);
        }

        self.announce(run.trigger.space_id.as_ref(), &run.id, false).await;
        info!(
            entity = %self.agent.id,
            run = %run.id,
            steps = result.steps,
            status = ?status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle finished"
        );
        Ok(CycleOutcome::Finished {
            run_id: run.id.clone(),
            status,
        })
    }

    async fn finish_run(
        &self,
        run: &Run,
        result: &crate::session::SessionResult,
        streamed: &StreamOutcome,
    ) -> CycleResult<RunStatus> {
        let pending: Vec<PendingToolCall> = streamed
            .pending()
            .map(|c| PendingToolCall {
                tool_call_id: c.id.clone(),
                tool_name: c.name.clone(),
                input: c.input.clone().unwrap_or_else(|| json!({})),
            })
            .collect();

        let mut done = match self.stores.runs.get(&run.id).await? {
            Some(current) => current,
            None => run.clone(),
        };
        done.step_count = result.steps;
        done.input_tokens = result.usage.input_tokens;
        done.output_tokens = result.usage.output_tokens;
        done.finished_at = Some(Utc::now());
        if done.status != RunStatus::Canceled {
            done.status = if pending.is_empty() {
                RunStatus::Completed
            } else {
                RunStatus::WaitingTool
            };
            done.pending_tool_calls = pending;
        }
        let status = done.status;
        self.stores.runs.update(done).await?;
        self.stores
            .bus
            .publish_run(&run.id, RunEvent::Finished { status })
            .await;
        Ok(status)
    }

    /// Undo everything a skipped cycle did to durable state.
    async fn rollback(&self, run: &Run) -> CycleResult<()> {
        self.stores.runs.delete(&run.id).await?;
        self.stores.bus.forget_run(&run.id).await;
        self.stores.inbox.reset_pending(&run.trigger.event_ids).await?;
        Ok(())
    }

    /// Deliver the cycle's mentions; with none accepted, resume whoever
    /// is waiting on the reply stack.
    async fn hand_off(
        &self,
        chain: &MentionChain,
        effects: &CycleEffects,
        trigger_space: Option<&SpaceId>,
    ) -> CycleResult<()> {
        let mut mentioned = false;
        for request in &effects.mentions {
            let Some(message) = effects.posts.iter().find(|p| p.id == request.message_id) else {
                continue;
            };
            let outcome = self
                .mentions
                .mention(Mention {
                    chain,
                    caller: &self.agent.id,
                    callee: &request.callee,
                    reason: &request.reason,
                    expect_reply: request.expect_reply,
                    message,
                })
                .await?;
            mentioned |= outcome.is_triggered();
        }
        if mentioned {
            return Ok(());
        }

        let reply = effects.posts.last();
        let space = reply
            .map(|p| p.space_id.clone())
            .or_else(|| trigger_space.cloned())
            .or_else(|| effects.active_space.clone());
        if let Some(space) = space {
            self.mentions
                .pop_reply_on_silence(chain, &self.agent.id, &space, reply)
                .await?;
        }
        Ok(())
    }

    async fn announce(&self, space: Option<&SpaceId>, run_id: &RunId, active: bool) {
        let Some(space) = space else {
            return;
        };
        let event = if active {
            SpaceEvent::AgentActive {
                entity_id: self.agent.id.clone(),
                run_id: run_id.clone(),
            }
        } else {
            SpaceEvent::AgentInactive {
                entity_id: self.agent.id.clone(),
                run_id: run_id.clone(),
            }
        };
        self.stores.bus.publish_space(space, event).await;
    }

    async fn fail(&self, run: Run, ids: &[EventId], e: CycleError) -> CycleOutcome {
        let message = e.to_string();
        error!(entity = %self.agent.id, run = %run.id, "cycle failed: {}", message);

        // a cancel that landed mid-cycle wins over the failure
        let mut run = match self.stores.runs.get(&run.id).await {
            Ok(Some(current)) => current,
            _ => run,
        };
        if run.status != RunStatus::Canceled {
            run.status = RunStatus::Failed;
            run.pending_tool_calls.clear();
        }
        run.error = Some(message.clone());
        run.finished_at = Some(Utc::now());
        let run_id = run.id.clone();
        let space = run.trigger.space_id.clone();
        if let Err(e) = self.stores.runs.update(run).await {
            warn!(run = %run_id, "could not mark run failed: {}", e);
        }
        self.stores
            .bus
            .publish_run(
                &run_id,
                RunEvent::Failed {
                    error: message.clone(),
                },
            )
            .await;
        if let Err(e) = self.stores.inbox.mark_failed(ids).await {
            warn!(run = %run_id, "could not mark events failed: {}", e);
        }
        self.announce(space.as_ref(), &run_id, false).await;
        CycleOutcome::Failed {
            run_id: Some(run_id),
            error: message,
        }
    }

    async fn fail_unopened(&self, ids: &[EventId], e: CycleError) -> CycleOutcome {
        let message = e.to_string();
        error!(entity = %self.agent.id, "cycle failed before its run opened: {}", message);
        if !ids.is_empty() {
            if let Err(e) = self.stores.inbox.mark_failed(ids).await {
                warn!(entity = %self.agent.id, "could not mark events failed: {}", e);
            }
        }
        CycleOutcome::Failed {
            run_id: None,
            error: message,
        }
    }
}

/// The chain a batch continues, with the space it arrived in. A non-empty
/// reply stack outranks depth.
fn batch_chain(batch: &[InboxEvent]) -> Option<(&MentionChain, &SpaceId)> {
    batch
        .iter()
        .filter_map(|event| match &event.payload {
            InboxPayload::SpaceMessage(m) => m.chain.as_ref().map(|chain| (chain, &m.space_id)),
            _ => None,
        })
        .max_by_key(|(chain, _)| (!chain.reply_stack.is_empty(), chain.depth))
}
