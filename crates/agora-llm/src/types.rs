//! LLM types for requests and streaming responses

use serde::{Deserialize, Serialize};

/// LLM request
#[derive(Clone, Debug, Serialize)]
pub struct LlmRequest {
    pub model: String,
    /// Full conversation. A leading `Message::System` carries the system prompt.
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<LlmTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            messages: Vec::new(),
            tools: None,
            max_tokens: Some(4096),
            temperature: None,
        }
    }
}

/// One structured part of an assistant or tool message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Message in a conversation, tagged by role.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { parts: Vec<ContentPart> },
    Tool { parts: Vec<ContentPart> },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Plain content of a system or user message.
    pub fn plain_text(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } => Some(content),
            _ => None,
        }
    }

    /// Concatenated text parts of an assistant message.
    pub fn assistant_narration(&self) -> Option<String> {
        let Self::Assistant { parts } = self else {
            return None;
        };
        let text: Vec<&str> = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        }
    }

    pub fn parts(&self) -> &[ContentPart] {
        match self {
            Self::Assistant { parts } | Self::Tool { parts } => parts,
            _ => &[],
        }
    }
}

/// Tool definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One item of the model's live event stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelEvent {
    TextDelta { text: String },
    ReasoningStart { id: String },
    ReasoningDelta { id: String, text: String },
    ReasoningEnd { id: String },
    ToolInputStart { id: String, name: String },
    ToolInputDelta { id: String, delta: String },
    /// Arguments are complete; the tool is about to execute.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        output: serde_json::Value,
    },
    ToolError {
        id: String,
        name: String,
        error: String,
    },
    /// End of one model request inside a multi-step session.
    StepFinish { step: u32, usage: Usage },
    Finish {
        stop_reason: Option<String>,
        usage: Usage,
    },
    Error { message: String },
}

/// Token usage
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Accumulated tool call from streaming
#[derive(Clone, Debug, Default)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AccumulatedToolCall {
    /// Parse the complete argument blob. Empty input means "no arguments".
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.arguments)
    }
}
