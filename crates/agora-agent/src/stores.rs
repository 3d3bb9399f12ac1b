//! The storage ports one host shares between all of its agents

use agora_store::{
    ConsciousnessRepo, EventBus, InboxQueue, MemoryConsciousnessRepo, MemoryEventBus, MemoryInbox,
    MemoryPlanStore, MemoryRunStore, MemorySpaceDirectory, MemorySpaceLog, PlanStore, RunStore,
    SpaceDirectory, SpaceLog,
};
use agora_tools::ToolServices;
use std::sync::Arc;

#[derive(Clone)]
pub struct Stores {
    pub inbox: Arc<dyn InboxQueue>,
    pub runs: Arc<dyn RunStore>,
    pub plans: Arc<dyn PlanStore>,
    pub spaces: Arc<dyn SpaceDirectory>,
    pub log: Arc<dyn SpaceLog>,
    pub bus: Arc<dyn EventBus>,
    pub consciousness: Arc<dyn ConsciousnessRepo>,
}

impl Stores {
    /// Everything in process memory.
    pub fn in_memory() -> Self {
        Self {
            inbox: Arc::new(MemoryInbox::new()),
            runs: Arc::new(MemoryRunStore::new()),
            plans: Arc::new(MemoryPlanStore::new()),
            spaces: Arc::new(MemorySpaceDirectory::new()),
            log: Arc::new(MemorySpaceLog::new()),
            bus: Arc::new(MemoryEventBus::new()),
            consciousness: Arc::new(MemoryConsciousnessRepo::new()),
        }
    }

    pub fn with_consciousness(mut self, repo: Arc<dyn ConsciousnessRepo>) -> Self {
        self.consciousness = repo;
        self
    }

    /// The subset tools are allowed to touch.
    pub fn tool_services(&self) -> ToolServices {
        ToolServices {
            spaces: self.spaces.clone(),
            log: self.log.clone(),
            bus: self.bus.clone(),
            plans: self.plans.clone(),
        }
    }
}
