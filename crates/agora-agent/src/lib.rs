//! Agora Agent - The per-entity think loop and everything it drives
//!
//! Bottom-up: `consciousness` (history and compaction), `partial_json` and
//! `stream` (live relay of in-flight tool arguments), `mention` (who wakes
//! next), `session` (one multi-step model conversation), `process` (the
//! loop), `scheduler` and `host` (supervision and the outer surface).

pub mod config;
pub mod consciousness;
pub mod error;
pub mod host;
pub mod mention;
pub mod partial_json;
pub mod process;
pub mod prompt;
pub mod scheduler;
pub mod session;
pub mod stores;
pub mod stream;

pub use config::{
    ActiveSpacePolicy, AgentConfig, AgoraConfig, MentionConfig, ProcessConfig, SchedulerConfig,
    StorageConfig,
};
pub use consciousness::{CompactionReport, ConsciousnessStore};
pub use error::{CycleError, CycleResult};
pub use host::AgoraHost;
pub use mention::{Mention, MentionOutcome, MentionProtocol, MentionRejection};
pub use process::{AgentProcess, CycleOutcome};
pub use prompt::{DefaultPromptBuilder, PromptBuilder};
pub use scheduler::PlanScheduler;
pub use session::{SessionResult, ThinkSession};
pub use stores::Stores;
pub use stream::{StreamOutcome, StreamProcessor, TrackedCall};
