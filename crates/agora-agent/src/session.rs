//! Think session: one bounded multi-step tool-calling conversation
//!
//! Each step is one model request. Tool calls from a step are executed in
//! order and their results fed to the next step, until the model stops
//! calling tools, a client-executed tool leaves a call pending, or the step
//! limit is hit. Every event is forwarded on a channel as it happens so the
//! stream processor can relay it while the session is still running.

use crate::consciousness::status_note;
use crate::error::{CycleError, CycleResult};
use agora_llm::{
    AccumulatedToolCall, ContentPart, LlmProvider, LlmRequest, Message, ModelEvent, Usage,
};
use agora_store::InboxQueue;
use agora_tools::{ToolContext, ToolRegistry, ToolResult, SKIP};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

const EVENT_BUFFER: usize = 256;

/// What the session added to the conversation and what it cost.
#[derive(Clone, Debug, Default)]
pub struct SessionResult {
    /// Assistant and tool turns, in order. Status notes are not included.
    pub turns: Vec<Message>,
    pub steps: u32,
    pub usage: Usage,
    /// The very first action of the cycle was `skip`.
    pub skipped: bool,
    /// Tool names in call order.
    pub tools_used: Vec<String>,
    pub stop_reason: String,
}

pub struct ThinkSession {
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
    pub ctx: Arc<ToolContext>,
    pub inbox: Arc<dyn InboxQueue>,
    pub model: String,
    pub max_output_tokens: u32,
    pub max_steps: u32,
}

/// A tool call as the model finished writing it.
struct Call {
    id: String,
    name: String,
    input: Result<Value, String>,
}

impl ThinkSession {
    /// Run the session on its own task. The stream ends when the task does.
    pub fn spawn(
        self,
        history: Vec<Message>,
    ) -> (ReceiverStream<ModelEvent>, JoinHandle<CycleResult<SessionResult>>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(async move { self.drive(history, tx).await });
        (ReceiverStream::new(rx), handle)
    }

    async fn drive(
        self,
        history: Vec<Message>,
        tx: mpsc::Sender<ModelEvent>,
    ) -> CycleResult<SessionResult> {
        let started = Instant::now();
        let definitions = self.tools.get_definitions();
        let mut result = SessionResult {
            stop_reason: "max_steps".to_string(),
            ..Default::default()
        };

        for step in 1..=self.max_steps.max(1) {
            let mut messages = history.clone();
            messages.extend(result.turns.iter().cloned());
            if step > 1 {
                let waiting = self.inbox.queued_len(&self.ctx.entity_id).await?;
                messages.push(status_note(started.elapsed(), waiting));
            }

            let request = LlmRequest {
                model: self.model.clone(),
                messages,
                tools: Some(definitions.clone()),
                max_tokens: Some(self.max_output_tokens),
                temperature: None,
            };
            let mut stream = self.provider.complete_stream(request).await?;

            let mut text = String::new();
            let mut building: Vec<AccumulatedToolCall> = Vec::new();
            let mut calls: Vec<Call> = Vec::new();
            let mut step_usage = Usage::default();
            let mut stop_reason = None;

            while let Some(item) = stream.next().await {
                let event = item?;
                match &event {
                    ModelEvent::TextDelta { text: delta } => text.push_str(delta),
                    ModelEvent::ToolInputStart { id, name } => building.push(AccumulatedToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    }),
                    ModelEvent::ToolInputDelta { id, delta } => {
                        if let Some(call) = building.iter_mut().find(|c| &c.id == id) {
                            call.arguments.push_str(delta);
                        }
                    }
                    ModelEvent::ToolCall { id, name, input } => {
                        building.retain(|c| &c.id != id);
                        calls.push(Call {
                            id: id.clone(),
                            name: name.clone(),
                            input: Ok(input.clone()),
                        });
                    }
                    ModelEvent::Finish {
                        stop_reason: reason,
                        usage,
                    } => {
                        step_usage = *usage;
                        stop_reason = reason.clone();
                        continue;
                    }
                    ModelEvent::Error { message } => {
                        let message = message.clone();
                        let _ = tx.send(event).await;
                        return Err(CycleError::Session(message));
                    }
                    _ => {}
                }
                let _ = tx.send(event).await;
            }

            // calls whose arguments streamed but never completed
            for partial in building {
                let input = partial.parse_arguments().map_err(|e| e.to_string());
                if let Ok(input) = &input {
                    let _ = tx
                        .send(ModelEvent::ToolCall {
                            id: partial.id.clone(),
                            name: partial.name.clone(),
                            input: input.clone(),
                        })
                        .await;
                }
                calls.push(Call {
                    id: partial.id,
                    name: partial.name,
                    input,
                });
            }

            result.steps = step;
            result.usage.add(step_usage);
            let _ = tx
                .send(ModelEvent::StepFinish {
                    step,
                    usage: step_usage,
                })
                .await;
            debug!(
                entity = %self.ctx.entity_id,
                step,
                tools = calls.len(),
                "step finished"
            );

            let mut parts = Vec::new();
            if !text.trim().is_empty() {
                parts.push(ContentPart::Text { text });
            }
            for call in &calls {
                parts.push(ContentPart::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone().unwrap_or_else(|_| json!({})),
                });
            }
            if !parts.is_empty() {
                result.turns.push(Message::Assistant { parts });
            }

            if calls.is_empty() {
                result.stop_reason = stop_reason.unwrap_or_else(|| "end_turn".to_string());
                break;
            }

            if step == 1 && calls[0].name == SKIP {
                let first = &calls[0];
                let args = first.input.clone().unwrap_or_else(|_| json!({}));
                self.tools.execute(SKIP, args, &self.ctx).await;
                result.skipped = true;
                result.tools_used.push(SKIP.to_string());
                result.stop_reason = "skipped".to_string();
                break;
            }

            let mut results = Vec::new();
            let mut waiting = false;
            for call in calls {
                result.tools_used.push(call.name.clone());
                let outcome = match call.input {
                    Ok(args) => self.tools.execute(&call.name, args, &self.ctx).await,
                    Err(e) => ToolResult::error(format!("Invalid tool arguments: {e}")),
                };
                match &outcome {
                    ToolResult::Pending => waiting = true,
                    ToolResult::Error(error) => {
                        let _ = tx
                            .send(ModelEvent::ToolError {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                error: error.clone(),
                            })
                            .await;
                    }
                    _ => {
                        let _ = tx
                            .send(ModelEvent::ToolResult {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                output: outcome.to_output(),
                            })
                            .await;
                    }
                }
                results.push(ContentPart::ToolResult {
                    tool_call_id: call.id,
                    tool_name: call.name,
                    output: outcome.to_output(),
                    is_error: outcome.is_error(),
                });
            }
            result.turns.push(Message::Tool { parts: results });

            if waiting {
                result.stop_reason = "waiting_tool".to_string();
                break;
            }
        }

        let _ = tx
            .send(ModelEvent::Finish {
                stop_reason: Some(result.stop_reason.clone()),
                usage: result.usage,
            })
            .await;
        Ok(result)
    }
}
