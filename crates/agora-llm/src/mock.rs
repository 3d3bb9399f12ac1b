//! MockProvider: deterministic model responses for testing
//!
//! Implements `LlmProvider`, returning canned event streams. Each call to
//! `complete_stream` pops the next behavior; tool arguments are streamed in
//! small chunks so consumers see realistic partial-JSON deltas.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, ModelEvent, Usage};
use async_stream::stream;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Size of each streamed argument chunk.
const ARG_CHUNK: usize = 7;

/// Mock behavior configuration
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Return a text-only response
    Text(String),
    /// Return a tool call with given name and args
    ToolCall { name: String, args: Value },
    /// Return multiple tool calls in one step
    MultiToolCall(Vec<(String, Value)>),
    /// Return text followed by a tool call
    TextThenTool {
        text: String,
        tool_name: String,
        tool_args: Value,
    },
    /// Return exactly these events, then a Finish
    Script(Vec<ModelEvent>),
    /// Fail the request before any event is produced
    RequestError(String),
    /// Produce one text delta, then a stream error
    StreamError(String),
}

/// A sequence of behaviors: each call to complete_stream pops the next one.
/// If the sequence is exhausted, returns the default behavior.
pub struct MockProvider {
    behaviors: Mutex<Vec<MockBehavior>>,
    default_behavior: MockBehavior,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockProvider {
    /// Create a mock that always returns the same behavior
    pub fn constant(behavior: MockBehavior) -> Self {
        Self {
            behaviors: Mutex::new(Vec::new()),
            default_behavior: behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock with a sequence of behaviors (consumed in order)
    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors),
            default_behavior: MockBehavior::Text("(mock: sequence exhausted)".into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Number of calls made
    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Every request received, in order
    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }

    /// Queue more behaviors behind the remaining ones
    pub async fn push(&self, behavior: MockBehavior) {
        self.behaviors.lock().await.push(behavior);
    }

    async fn next_behavior(&self) -> MockBehavior {
        let mut behaviors = self.behaviors.lock().await;
        if behaviors.is_empty() {
            self.default_behavior.clone()
        } else {
            behaviors.remove(0)
        }
    }
}

fn mock_id() -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    format!("toolu_mock_{}", uuid.split('-').next().unwrap_or("0"))
}

/// Events for one streamed tool call: start, chunked input, complete call.
pub fn tool_call_events(id: &str, name: &str, args: &Value) -> Vec<ModelEvent> {
    let raw = serde_json::to_string(args).unwrap_or_default();
    let chars: Vec<char> = raw.chars().collect();
    let mut events = vec![ModelEvent::ToolInputStart {
        id: id.to_string(),
        name: name.to_string(),
    }];
    for chunk in chars.chunks(ARG_CHUNK) {
        events.push(ModelEvent::ToolInputDelta {
            id: id.to_string(),
            delta: chunk.iter().collect(),
        });
    }
    events.push(ModelEvent::ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        input: args.clone(),
    });
    events
}

fn text_events(text: &str) -> Vec<ModelEvent> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(20)
        .map(|c| ModelEvent::TextDelta {
            text: c.iter().collect(),
        })
        .collect()
}

fn finish(stop_reason: &str) -> ModelEvent {
    ModelEvent::Finish {
        stop_reason: Some(stop_reason.to_string()),
        usage: Usage {
            input_tokens: 100,
            output_tokens: 20,
        },
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete_stream(&self, request: LlmRequest) -> LlmResult<LlmStream> {
        self.requests.lock().await.push(request);
        let behavior = self.next_behavior().await;

        let events: Vec<ModelEvent> = match behavior {
            MockBehavior::RequestError(msg) => return Err(LlmError::RequestFailed(msg)),
            MockBehavior::StreamError(msg) => {
                return Ok(Box::pin(stream! {
                    yield Ok(ModelEvent::TextDelta { text: "partial".into() });
                    yield Err(LlmError::StreamError(msg));
                }));
            }
            MockBehavior::Text(text) => {
                let mut events = text_events(&text);
                events.push(finish("end_turn"));
                events
            }
            MockBehavior::ToolCall { name, args } => {
                let mut events = tool_call_events(&mock_id(), &name, &args);
                events.push(finish("tool_use"));
                events
            }
            MockBehavior::MultiToolCall(tools) => {
                let mut events = Vec::new();
                for (name, args) in tools {
                    events.extend(tool_call_events(&mock_id(), &name, &args));
                }
                events.push(finish("tool_use"));
                events
            }
            MockBehavior::TextThenTool {
                text,
                tool_name,
                tool_args,
            } => {
                let mut events = text_events(&text);
                events.extend(tool_call_events(&mock_id(), &tool_name, &tool_args));
                events.push(finish("tool_use"));
                events
            }
            MockBehavior::Script(mut events) => {
                if !events.iter().any(|e| matches!(e, ModelEvent::Finish { .. })) {
                    events.push(finish("end_turn"));
                }
                events
            }
        };

        Ok(Box::pin(stream! {
            for event in events {
                yield Ok(event);
            }
        }))
    }
}
