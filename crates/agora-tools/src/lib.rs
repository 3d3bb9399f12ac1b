//! Agora Tools: what an agent can do during a cycle
//!
//! Each tool is a self-contained file in src/tools/.
//! To add a tool: create the file, implement Tool trait, register below.

pub mod context;
pub mod registry;
pub mod tools;

pub use context::{CycleEffects, MentionRequest, ToolContext, ToolServices};
pub use registry::{Tool, ToolRegistry, ToolResult};
pub use tools::external::{ExternalTool, ExternalToolSpec};
pub use tools::plan::next_run_after;

/// Name of the tool whose `text` argument is relayed live.
pub const SEND_MESSAGE: &str = tools::send_message::NAME;
/// Name of the no-op tool that rolls a cycle back.
pub const SKIP: &str = tools::skip::NAME;
pub const ENTER_SPACE: &str = tools::enter_space::NAME;

/// Create the registry every agent gets, plus its configured external tools.
pub fn create_default_registry(external: &[ExternalToolSpec]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // --- Communication ---
    registry.register(tools::send_message::SendMessageTool);
    registry.register(tools::enter_space::EnterSpaceTool);
    registry.register(tools::skip::SkipTool);

    // --- Self-scheduling ---
    registry.register(tools::plan::SetPlanTool);
    registry.register(tools::plan::CancelPlanTool);

    // --- Client-executed ---
    for spec in external {
        if registry.get(&spec.name).is_some() {
            tracing::warn!("External tool {} shadows a builtin, ignored", spec.name);
            continue;
        }
        registry.register(ExternalTool::new(spec.clone()));
    }

    registry
}
