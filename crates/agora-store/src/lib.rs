//! Agora Store - Persistence ports and their in-memory implementations
//!
//! Every collaborator the agent loop needs from storage is a trait here:
//! the durable blocking inbox, the run/plan record store, the space
//! directory and log, the relay event bus, and the consciousness repository.
//! The `Memory*` types back tests and single-process deployments.

pub mod bus;
pub mod consciousness;
pub mod inbox;
pub mod records;
pub mod spaces;

pub use bus::{EventBus, MemoryEventBus};
pub use consciousness::{
    ConsciousnessRecord, ConsciousnessRepo, FileConsciousnessRepo, MemoryConsciousnessRepo,
};
pub use inbox::{InboxQueue, MemoryInbox, PushOutcome};
pub use records::{MemoryPlanStore, MemoryRunStore, PlanStore, RunFilter, RunStore};
pub use spaces::{MemorySpaceDirectory, MemorySpaceLog, SpaceDirectory, SpaceLog};
