//! System prompt assembly
//!
//! The prompt is rebuilt at the start of every cycle so membership and tool
//! changes show up without touching stored history.

use crate::config::AgentConfig;
use agora_core::{MemberKind, Space};
use agora_tools::ToolRegistry;
use std::fmt::Write;

/// Builds the system message for one agent's cycle.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, agent: &AgentConfig, spaces: &[Space], tools: &ToolRegistry) -> String;
}

/// Persona, memberships, and tool guidance.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, agent: &AgentConfig, spaces: &[Space], tools: &ToolRegistry) -> String {
        let mut out = format!(
            "You are {} (id: {}), a persistent agent. You wake when something \
             arrives in your inbox, act, and go back to sleep.\n",
            agent.display_name(),
            agent.id
        );
        if !agent.instructions.trim().is_empty() {
            out.push('\n');
            out.push_str(agent.instructions.trim());
            out.push('\n');
        }

        if !spaces.is_empty() {
            out.push_str("\n## Spaces\n");
            for space in spaces {
                let members: Vec<String> = space
                    .members
                    .iter()
                    .filter(|m| m.entity_id != agent.id)
                    .map(|m| {
                        let kind = match m.kind {
                            MemberKind::Human => "human",
                            MemberKind::Agent => "agent",
                        };
                        format!("{} ({kind})", m.entity_id)
                    })
                    .collect();
                let _ = writeln!(
                    out,
                    "- {} \"{}\": {}",
                    space.id,
                    space.name,
                    if members.is_empty() {
                        "no one else".to_string()
                    } else {
                        members.join(", ")
                    }
                );
            }
        }

        let guidance = tools.combined_prompts();
        if !guidance.is_empty() {
            out.push_str("\n## Tools\n");
            out.push_str(&guidance);
            out.push('\n');
        }
        out
    }
}
