//! Agora host: supervises agent processes and exposes the outer surface
//!
//! The host owns the shared stores, spawns one `AgentProcess` per configured
//! agent plus the plan scheduler, and is the only way in from outside:
//! posting into spaces, pushing inbox events, completing client-executed
//! tool calls, and querying or canceling runs.

use crate::config::{AgentConfig, AgoraConfig};
use crate::mention::MentionProtocol;
use crate::process::AgentProcess;
use crate::prompt::{DefaultPromptBuilder, PromptBuilder};
use crate::scheduler::PlanScheduler;
use crate::stores::Stores;
use agora_core::{
    EntityId, Error, EventId, InboxEvent, InboxPayload, MemberKind, Plan, Result, Run, RunEvent,
    RunId, RunStatus, ServiceTrigger, SpaceEvent, SpaceId, SpaceMessage, ToolResultTrigger,
    TriggerMode,
};
use agora_llm::LlmProvider;
use agora_store::{PushOutcome, RunFilter};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct AgoraHost {
    config: AgoraConfig,
    stores: Stores,
    provider: Arc<dyn LlmProvider>,
    prompt: Arc<dyn PromptBuilder>,
    mentions: MentionProtocol,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AgoraHost {
    pub fn new(config: AgoraConfig, stores: Stores, provider: Arc<dyn LlmProvider>) -> Self {
        let mentions = MentionProtocol::new(
            stores.inbox.clone(),
            stores.spaces.clone(),
            stores.runs.clone(),
            config.mention.clone(),
        );
        Self {
            config,
            stores,
            provider,
            prompt: Arc::new(DefaultPromptBuilder),
            mentions,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_prompt_builder(mut self, prompt: Arc<dyn PromptBuilder>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Write the configured spaces into the directory.
    pub async fn seed_spaces(&self) -> Result<()> {
        for space in &self.config.spaces {
            self.stores.spaces.upsert(space.clone()).await?;
        }
        Ok(())
    }

    /// A process for one configured agent, not yet running. Tests drive
    /// cycles through it directly.
    pub fn process(&self, agent_id: &EntityId) -> Result<AgentProcess> {
        let agent = self
            .config
            .agent(agent_id)
            .cloned()
            .ok_or_else(|| Error::not_found("agent", agent_id))?;
        Ok(self.process_for(agent))
    }

    fn process_for(&self, agent: AgentConfig) -> AgentProcess {
        AgentProcess::new(
            agent,
            &self.config,
            self.stores.clone(),
            self.provider.clone(),
            self.prompt.clone(),
        )
    }

    /// Seed spaces, then spawn every agent process and the scheduler.
    pub async fn start(&self) -> Result<()> {
        self.seed_spaces().await?;
        let mut tasks = self.tasks.lock().await;
        for agent in &self.config.agents {
            let process = self.process_for(agent.clone());
            let cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(process.run(cancel)));
        }
        let scheduler = PlanScheduler::new(
            self.stores.plans.clone(),
            self.stores.inbox.clone(),
            Duration::from_millis(self.config.scheduler.tick_ms.max(1)),
        );
        tasks.push(tokio::spawn(scheduler.run(self.cancel.child_token())));
        info!(
            agents = self.config.agents.len(),
            spaces = self.config.spaces.len(),
            "agora host started"
        );
        Ok(())
    }

    /// Stop every task. Agents finish their current cycle first.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("agora host stopped");
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    pub async fn push_inbox_event(&self, event: InboxEvent) -> Result<PushOutcome> {
        self.stores.inbox.push(event).await
    }

    pub async fn trigger_service(
        &self,
        entity_id: &EntityId,
        service_name: &str,
        payload: Value,
    ) -> Result<PushOutcome> {
        let event = InboxEvent::new(
            entity_id.clone(),
            InboxPayload::Service(ServiceTrigger {
                service_name: service_name.to_string(),
                payload,
            }),
        );
        self.stores.inbox.push(event).await
    }

    /// Post into a space from outside. A human post wakes agents per the
    /// space's trigger mode; an agent post wakes no one.
    pub async fn post_message(
        &self,
        space_id: &SpaceId,
        sender_id: &EntityId,
        content: &str,
    ) -> Result<SpaceMessage> {
        let space = self
            .stores
            .spaces
            .get(space_id)
            .await?
            .ok_or_else(|| Error::not_found("space", space_id))?;
        let sender = space.member(sender_id).ok_or_else(|| {
            Error::invalid_input(format!("{sender_id} is not a member of {space_id}"))
        })?;

        let message = SpaceMessage::new(space_id.clone(), sender_id.clone(), sender.kind, content);
        self.stores.log.append(message.clone()).await?;
        self.stores
            .bus
            .publish_space(
                space_id,
                SpaceEvent::Message {
                    message: message.clone(),
                },
            )
            .await;

        if sender.kind == MemberKind::Human {
            match space.trigger_mode {
                TriggerMode::Fanout => {
                    self.mentions.trigger_fanout(&message).await?;
                }
                TriggerMode::RoundRobin => {
                    self.mentions.trigger_round_robin(&message).await?;
                }
                TriggerMode::None => debug!(space = %space_id, "trigger mode none, nobody woken"),
            }
        }
        Ok(message)
    }

    /// Complete one client-executed tool call of a waiting run. The result
    /// reaches the agent as a `tool_result` inbox event.
    pub async fn submit_tool_result(
        &self,
        run_id: &RunId,
        tool_call_id: &str,
        result: Value,
    ) -> Result<EventId> {
        let mut run = self
            .stores
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| Error::not_found("run", run_id))?;
        let index = run
            .pending_tool_calls
            .iter()
            .position(|c| c.tool_call_id == tool_call_id)
            .filter(|_| run.status == RunStatus::WaitingTool)
            .ok_or_else(|| {
                Error::invalid_state(format!(
                    "run {run_id} has no pending tool call {tool_call_id}"
                ))
            })?;
        let call = run.pending_tool_calls.remove(index);
        if run.pending_tool_calls.is_empty() {
            run.status = RunStatus::Completed;
        }
        let entity_id = run.entity_id.clone();
        self.stores.runs.update(run).await?;

        let event = InboxEvent::new(
            entity_id,
            InboxPayload::ToolResult(ToolResultTrigger {
                run_id: run_id.clone(),
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                result: result.clone(),
            }),
        )
        .with_dedup_key(format!("tool:{}:{}", run_id, call.tool_call_id));
        let pushed = self.stores.inbox.push(event).await?;
        self.stores
            .bus
            .publish_run(
                run_id,
                RunEvent::ToolResult {
                    tool_call_id: call.tool_call_id,
                    tool_name: call.tool_name,
                    output: result,
                },
            )
            .await;
        Ok(pushed.event_id().clone())
    }

    // ------------------------------------------------------------------
    // Audit surface
    // ------------------------------------------------------------------

    pub async fn get_run(&self, run_id: &RunId) -> Result<Option<Run>> {
        self.stores.runs.get(run_id).await
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        self.stores.runs.list(filter).await
    }

    pub async fn run_events(&self, run_id: &RunId) -> Vec<RunEvent> {
        self.stores.bus.run_events(run_id).await
    }

    pub async fn list_plans(&self, entity_id: &EntityId) -> Result<Vec<Plan>> {
        self.stores.plans.list(entity_id).await
    }

    /// Cancel a run that has not finished. Its pending tool calls are dropped
    /// and it stops counting for message dedup.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<Run> {
        let mut run = self
            .stores
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| Error::not_found("run", run_id))?;
        if run.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "run {run_id} already {:?}",
                run.status
            )));
        }
        run.status = RunStatus::Canceled;
        run.pending_tool_calls.clear();
        run.finished_at = Some(Utc::now());
        self.stores.runs.update(run.clone()).await?;
        self.stores
            .bus
            .publish_run(
                run_id,
                RunEvent::Finished {
                    status: RunStatus::Canceled,
                },
            )
            .await;
        info!(run = %run_id, "run canceled");
        Ok(run)
    }

    pub fn subscribe_space(&self, space_id: &SpaceId) -> broadcast::Receiver<SpaceEvent> {
        self.stores.bus.subscribe_space(space_id)
    }
}
