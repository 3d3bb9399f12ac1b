//! LLM Provider trait

use crate::types::{LlmRequest, ModelEvent};
use futures::Stream;
use std::pin::Pin;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Stream type for LLM responses
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<ModelEvent>> + Send>>;

/// LLM Provider trait
///
/// One call is one model request (one step). The stream ends with
/// `ModelEvent::Finish`; tool execution is the caller's business.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete_stream(&self, request: LlmRequest) -> LlmResult<LlmStream>;
}
