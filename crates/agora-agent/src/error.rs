//! Errors that end a think-cycle

use agora_llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Store(#[from] agora_core::Error),

    #[error("model: {0}")]
    Llm(#[from] LlmError),

    #[error("think session aborted: {0}")]
    Session(String),
}

pub type CycleResult<T> = std::result::Result<T, CycleError>;
