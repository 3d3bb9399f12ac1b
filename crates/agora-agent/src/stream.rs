//! Stream processor: turns the model's event stream into relay traffic
//!
//! Every model event lands on the run's audit channel. Arguments of the
//! `send_message` tool are parsed while they stream, and once the target
//! space is known the growing `text` field is relayed to that space as
//! `message.stream.*` events. Deltas are suffixes of what was already sent,
//! never corrections.
//!
//! Without an explicit `spaceId` the relay waits for the arguments to close
//! before falling back to the active space, since the key may still arrive
//! after `text`. A cycle whose first call is `skip` relays nothing.

use crate::partial_json::parse_partial;
use agora_core::{RunEvent, SpaceEvent, SpaceId};
use agora_llm::{ModelEvent, Usage};
use agora_tools::{ToolContext, SEND_MESSAGE, SKIP};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One tool call seen on the stream.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedCall {
    pub id: String,
    pub name: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl TrackedCall {
    /// A tool error counts as resolved.
    pub fn is_resolved(&self) -> bool {
        self.output.is_some() || self.error.is_some()
    }
}

/// Live relay state of one `send_message` call.
#[derive(Clone, Debug, Default)]
struct Relay {
    buffer: String,
    space: Option<SpaceId>,
    sent: String,
    open: bool,
    done: bool,
}

/// Everything observed while draining one session's stream.
#[derive(Clone, Debug, Default)]
pub struct StreamOutcome {
    pub calls: Vec<TrackedCall>,
    pub usage: Usage,
    pub steps: u32,
    pub stop_reason: Option<String>,
    pub error: Option<String>,
    /// Text relayed per stream id, for inspection.
    pub relayed: HashMap<String, String>,
}

impl StreamOutcome {
    pub fn pending(&self) -> impl Iterator<Item = &TrackedCall> {
        self.calls.iter().filter(|c| !c.is_resolved())
    }

    pub fn resolved(&self) -> impl Iterator<Item = &TrackedCall> {
        self.calls.iter().filter(|c| c.is_resolved())
    }
}

pub struct StreamProcessor {
    ctx: Arc<ToolContext>,
    relays: HashMap<String, Relay>,
    outcome: StreamOutcome,
}

impl StreamProcessor {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self {
            ctx,
            relays: HashMap::new(),
            outcome: StreamOutcome::default(),
        }
    }

    /// Drain the stream to its end.
    pub async fn run<S>(mut self, stream: S) -> StreamOutcome
    where
        S: Stream<Item = ModelEvent>,
    {
        tokio::pin!(stream);
        while let Some(event) = stream.next().await {
            self.handle(event).await;
        }
        // a relay left open means the stream broke mid-call
        let open: Vec<String> = self
            .relays
            .iter()
            .filter(|(_, r)| r.open)
            .map(|(id, _)| id.clone())
            .collect();
        for id in open {
            self.close_relay(&id).await;
        }
        self.outcome
    }

    async fn handle(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::TextDelta { .. } => {}
            ModelEvent::ReasoningStart { id } => self.audit(RunEvent::ReasoningStart { id }).await,
            ModelEvent::ReasoningDelta { id, text } => {
                self.audit(RunEvent::ReasoningDelta { id, text }).await
            }
            ModelEvent::ReasoningEnd { id } => self.audit(RunEvent::ReasoningEnd { id }).await,
            ModelEvent::ToolInputStart { id, name } => {
                self.track(&id, &name);
                if name == SEND_MESSAGE && !self.skipping() {
                    self.relays.insert(id.clone(), Relay::default());
                }
                self.audit(RunEvent::ToolStarted {
                    tool_call_id: id,
                    tool_name: name,
                })
                .await;
            }
            ModelEvent::ToolInputDelta { id, delta } => {
                if let Some(relay) = self.relays.get_mut(&id) {
                    relay.buffer.push_str(&delta);
                    self.advance_relay(&id).await;
                }
                self.audit(RunEvent::ToolInputDelta {
                    tool_call_id: id,
                    delta,
                })
                .await;
            }
            ModelEvent::ToolCall { id, name, input } => {
                self.track(&id, &name).input = Some(input.clone());
                if name == SEND_MESSAGE && !self.skipping() {
                    self.finish_relay(&id, &input).await;
                }
                self.audit(RunEvent::ToolCall {
                    tool_call_id: id,
                    tool_name: name,
                    input,
                })
                .await;
            }
            ModelEvent::ToolResult { id, name, output } => {
                self.track(&id, &name).output = Some(output.clone());
                self.audit(RunEvent::ToolResult {
                    tool_call_id: id,
                    tool_name: name,
                    output,
                })
                .await;
            }
            ModelEvent::ToolError { id, name, error } => {
                self.track(&id, &name).error = Some(error.clone());
                if name == SEND_MESSAGE {
                    self.relay_tool_error(&id, &name, &error).await;
                }
                self.audit(RunEvent::ToolError {
                    tool_call_id: id,
                    tool_name: name,
                    error,
                })
                .await;
            }
            ModelEvent::StepFinish { step, usage } => {
                self.outcome.steps = self.outcome.steps.max(step);
                self.audit(RunEvent::StepFinish {
                    step,
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                })
                .await;
            }
            ModelEvent::Finish { stop_reason, usage } => {
                self.outcome.stop_reason = stop_reason;
                self.outcome.usage = usage;
            }
            ModelEvent::Error { message } => {
                warn!(run = %self.ctx.run_id, "model stream error: {}", message);
                self.outcome.error = Some(message);
            }
        }
    }

    fn track(&mut self, id: &str, name: &str) -> &mut TrackedCall {
        let index = match self.outcome.calls.iter().position(|c| c.id == id) {
            Some(i) => i,
            None => {
                self.outcome.calls.push(TrackedCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: None,
                    output: None,
                    error: None,
                });
                self.outcome.calls.len() - 1
            }
        };
        &mut self.outcome.calls[index]
    }

    /// The first call of the first step is `skip`: the cycle will be rolled
    /// back and none of its posts will exist.
    fn skipping(&self) -> bool {
        self.outcome.steps == 0 && self.outcome.calls.first().is_some_and(|c| c.name == SKIP)
    }

    async fn audit(&self, event: RunEvent) {
        self.ctx.services.bus.publish_run(&self.ctx.run_id, event).await;
    }

    async fn publish(&self, space: &SpaceId, event: SpaceEvent) {
        debug!(space = %space, event = event.name(), "relay");
        self.ctx.services.bus.publish_space(space, event).await;
    }

    /// Re-parse the buffered arguments and relay whatever text is new.
    async fn advance_relay(&mut self, id: &str) {
        let Some(relay) = self.relays.get(id) else {
            return;
        };
        let Some(partial) = parse_partial(&relay.buffer) else {
            return;
        };
        let target = match partial.complete_str("spaceId") {
            Some(space) => Some(SpaceId::new(space)),
            None if partial.closed && !partial.has_key("spaceId") => self.ctx.active_space().await,
            None => None,
        };
        let text = partial.str("text").map(str::to_string);
        self.relay_text(id, target, text).await;
    }

    /// Final arguments arrived: flush any unsent text and close the relay.
    async fn finish_relay(&mut self, id: &str, input: &Value) {
        if !self.relays.contains_key(id) {
            self.relays.insert(id.to_string(), Relay::default());
        }
        let target = match input.get("spaceId").and_then(Value::as_str) {
            Some(space) => Some(SpaceId::new(space)),
            None => self.ctx.active_space().await,
        };
        let text = input.get("text").and_then(Value::as_str).map(str::to_string);
        self.relay_text(id, target, text).await;
        self.close_relay(id).await;
    }

    async fn relay_text(&mut self, id: &str, target: Option<SpaceId>, text: Option<String>) {
        let Some(relay) = self.relays.get_mut(id).filter(|r| !r.done) else {
            return;
        };
        if relay.space.is_none() {
            let Some(space) = target else {
                return;
            };
            relay.space = Some(space);
        }
        let Some(space) = relay.space.clone() else {
            return;
        };
        let start = !relay.open;
        relay.open = true;

        let delta = match text {
            Some(text) if text.len() > relay.sent.len() && text.starts_with(&relay.sent) => {
                let delta = text[relay.sent.len()..].to_string();
                relay.sent = text;
                Some(delta)
            }
            Some(text) if !text.starts_with(&relay.sent) => {
                warn!(stream = id, "relay text diverged from what was sent, holding");
                None
            }
            _ => None,
        };

        if start {
            self.publish(
                &space,
                SpaceEvent::StreamStart {
                    stream_id: id.to_string(),
                    entity_id: self.ctx.entity_id.clone(),
                    run_id: self.ctx.run_id.clone(),
                },
            )
            .await;
        }
        if let Some(delta) = delta {
            self.outcome
                .relayed
                .entry(id.to_string())
                .or_default()
                .push_str(&delta);
            self.publish(
                &space,
                SpaceEvent::StreamDelta {
                    stream_id: id.to_string(),
                    delta,
                },
            )
            .await;
        }
    }

    async fn close_relay(&mut self, id: &str) {
        let Some(relay) = self.relays.get_mut(id) else {
            return;
        };
        if !relay.open {
            return;
        }
        relay.open = false;
        relay.done = true;
        if let Some(space) = relay.space.clone() {
            self.publish(
                &space,
                SpaceEvent::StreamEnd {
                    stream_id: id.to_string(),
                },
            )
            .await;
        }
    }

    async fn relay_tool_error(&mut self, id: &str, name: &str, error: &str) {
        let target = match self.relays.get(id).and_then(|r| r.space.clone()) {
            Some(space) => Some(space),
            None => self.ctx.active_space().await,
        };
        let Some(space) = target else {
            return;
        };
        self.publish(
            &space,
            SpaceEvent::ToolError {
                run_id: self.ctx.run_id.clone(),
                tool_call_id: id.to_string(),
                tool_name: name.to_string(),
                error: error.to_string(),
            },
        )
        .await;
    }
}
