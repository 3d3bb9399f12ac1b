//! Agora LLM - Provider adapters with streaming support

pub mod anthropic;
pub mod mock;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use mock::{MockBehavior, MockProvider};
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use types::*;
