//! Anthropic Claude API provider with SSE streaming

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{AccumulatedToolCall, ContentPart, LlmRequest, Message, ModelEvent, Usage};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete_stream(&self, request: LlmRequest) -> LlmResult<LlmStream> {
        let (system, messages) = to_anthropic_messages(&request.messages);

        let body = AnthropicRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(4096),
            stream: true,
            system,
            temperature: request.temperature,
            tools: request.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|t| AnthropicTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.input_schema.clone(),
                    })
                    .collect()
            }),
        };

        debug!("Anthropic request: model={}", body.model);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Anthropic error {}: {}", status, error_text);

            if status.as_u16() == 401 {
                return Err(LlmError::AuthFailed(error_text));
            } else if status.as_u16() == 429 {
                return Err(LlmError::RateLimited {
                    retry_after_ms: 60000,
                });
            } else {
                return Err(LlmError::RequestFailed(format!(
                    "{}: {}",
                    status, error_text
                )));
            }
        }

        let stream = parse_sse_stream(response.bytes_stream());
        Ok(Box::pin(stream))
    }
}

/// Convert the role-tagged conversation into Anthropic's wire shape.
///
/// System messages are lifted into the `system` field. Tool results travel as
/// `user` messages. Consecutive messages with the same wire role are merged,
/// since the API requires alternation.
pub fn to_anthropic_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system: Vec<&str> = Vec::new();
    let mut out: Vec<AnthropicMessage> = Vec::new();

    for message in messages {
        let (role, blocks) = match message {
            Message::System { content } => {
                system.push(content);
                continue;
            }
            Message::User { content } => ("user", vec![serde_json::json!({"type": "text", "text": content})]),
            Message::Assistant { parts } => ("assistant", parts.iter().filter_map(part_to_block).collect()),
            Message::Tool { parts } => ("user", parts.iter().filter_map(part_to_block).collect()),
        };
        if blocks.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => out.push(AnthropicMessage {
                role: role.to_string(),
                content: blocks,
            }),
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, out)
}

fn part_to_block(part: &ContentPart) -> Option<serde_json::Value> {
    match part {
        ContentPart::Text { text } if text.is_empty() => None,
        ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
        ContentPart::ToolCall { id, name, input } => Some(serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        })),
        ContentPart::ToolResult {
            tool_call_id,
            output,
            is_error,
            ..
        } => {
            let content = match output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
                "is_error": is_error,
            }))
        }
    }
}

enum OpenBlock {
    Tool(AccumulatedToolCall),
    Thinking(String),
    Text,
}

fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl futures::Stream<Item = LlmResult<ModelEvent>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        let mut blocks: HashMap<u32, OpenBlock> = HashMap::new();
        let mut usage = Usage::default();
        let mut stop_reason: Option<String> = None;

        tokio::pin!(bytes_stream);

        while let Some(chunk_result) = bytes_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    continue;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(event_end) = buffer.find("\n\n") {
                let event_str = buffer[..event_end].to_string();
                buffer = buffer[event_end + 2..].to_string();

                let mut event_type = String::new();
                let mut event_data = String::new();

                for line in event_str.lines() {
                    if let Some(rest) = line.strip_prefix("event: ") {
                        event_type = rest.to_string();
                    } else if let Some(rest) = line.strip_prefix("data: ") {
                        event_data = rest.to_string();
                    }
                }

                if event_data.is_empty() { continue; }

                match event_type.as_str() {
                    "message_start" => {
                        if let Ok(data) = serde_json::from_str::<MessageStart>(&event_data) {
                            if let Some(u) = data.message.usage {
                                usage.input_tokens = u.input_tokens.unwrap_or(0);
                            }
                        }
                    }
                    "content_block_start" => {
                        if let Ok(data) = serde_json::from_str::<ContentBlockStart>(&event_data) {
                            match data.content_block {
                                ContentBlockType::ToolUse { id, name } => {
                                    blocks.insert(data.index, OpenBlock::Tool(AccumulatedToolCall {
                                        id: id.clone(),
                                        name: name.clone(),
                                        arguments: String::new(),
                                    }));
                                    yield Ok(ModelEvent::ToolInputStart { id, name });
                                }
                                ContentBlockType::Thinking { .. } => {
                                    let id = format!("reasoning-{}", data.index);
                                    blocks.insert(data.index, OpenBlock::Thinking(id.clone()));
                                    yield Ok(ModelEvent::ReasoningStart { id });
                                }
                                ContentBlockType::Text { .. } => {
                                    blocks.insert(data.index, OpenBlock::Text);
                                }
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Ok(data) = serde_json::from_str::<ContentBlockDelta>(&event_data) {
                            match data.delta {
                                DeltaType::TextDelta { text } => {
                                    yield Ok(ModelEvent::TextDelta { text });
                                }
                                DeltaType::ThinkingDelta { thinking } => {
                                    if let Some(OpenBlock::Thinking(id)) = blocks.get(&data.index) {
                                        yield Ok(ModelEvent::ReasoningDelta { id: id.clone(), text: thinking });
                                    }
                                }
                                DeltaType::InputJsonDelta { partial_json } => {
                                    if let Some(OpenBlock::Tool(tool)) = blocks.get_mut(&data.index) {
                                        tool.arguments.push_str(&partial_json);
                                        yield Ok(ModelEvent::ToolInputDelta {
                                            id: tool.id.clone(),
                                            delta: partial_json,
                                        });
                                    }
                                }
                                DeltaType::SignatureDelta { .. } => {}
                            }
                        }
                    }
                    "content_block_stop" => {
                        if let Ok(data) = serde_json::from_str::<ContentBlockStop>(&event_data) {
                            match blocks.remove(&data.index) {
                                Some(OpenBlock::Tool(tool)) => {
                                    let input = tool.parse_arguments().unwrap_or_else(|_| serde_json::json!({}));
                                    yield Ok(ModelEvent::ToolCall { id: tool.id, name: tool.name, input });
                                }
                                Some(OpenBlock::Thinking(id)) => {
                                    yield Ok(ModelEvent::ReasoningEnd { id });
                                }
                                Some(OpenBlock::Text) | None => {}
                            }
                        }
                    }
                    "message_delta" => {
                        if let Ok(data) = serde_json::from_str::<MessageDelta>(&event_data) {
                            if let Some(sr) = data.delta.stop_reason {
                                debug!("Message complete: stop_reason={}", sr);
                                stop_reason = Some(sr);
                            }
                            if let Some(u) = data.usage {
                                usage.output_tokens = u.output_tokens.unwrap_or(usage.output_tokens);
                            }
                        }
                    }
                    "message_stop" => {
                        yield Ok(ModelEvent::Finish {
                            stop_reason: stop_reason.take(),
                            usage,
                        });
                    }
                    "error" => {
                        if let Ok(data) = serde_json::from_str::<ErrorEvent>(&event_data) {
                            yield Err(LlmError::StreamError(data.error.message));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Deserialize)]
struct MessageStartBody {
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    index: u32,
    content_block: ContentBlockType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlockType {
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(rename = "thinking")]
    #[allow(dead_code)]
    Thinking { thinking: String },
    #[serde(rename = "text")]
    #[allow(dead_code)]
    Text { text: String },
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    index: u32,
    delta: DeltaType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum DeltaType {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(rename = "signature_delta")]
    #[allow(dead_code)]
    SignatureDelta { signature: String },
}

#[derive(Deserialize)]
struct ContentBlockStop {
    index: u32,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct MessageDeltaContent {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[allow(dead_code)]
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
