//! Agora configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use agora_core::{EntityId, Error, Result, Space};
use agora_tools::ExternalToolSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgoraConfig {
    /// Per-agent think-cycle parameters.
    pub process: ProcessConfig,
    /// Mention-chain loop protection.
    pub mention: MentionConfig,
    /// Plan scheduler.
    pub scheduler: SchedulerConfig,
    /// Where consciousness documents live.
    pub storage: StorageConfig,
    /// Agents to run.
    pub agents: Vec<AgentConfig>,
    /// Spaces and their membership.
    pub spaces: Vec<Space>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Upper bound on model requests per cycle.
    pub max_steps: u32,
    /// Consciousness budget, in estimated tokens, before compaction kicks in.
    pub max_consciousness_tokens: usize,
    /// Cycles always kept verbatim by compaction.
    pub min_retained_cycles: usize,
    /// Pause after a failed cycle.
    pub error_pause_ms: u64,
    /// Whether the active space survives across cycles.
    pub active_space_policy: ActiveSpacePolicy,
    /// Default model, overridable per agent.
    pub model: String,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSpacePolicy {
    /// Every cycle starts in the space that triggered it (or none).
    #[default]
    ResetPerCycle,
    /// The active space carries over, restored from history on startup.
    Persist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MentionConfig {
    /// Mentions allowed in one chain before propagation stops.
    pub max_depth: u32,
    /// Agents that may wait for a reply at once in one chain.
    pub max_reply_stack: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often due plans are checked.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for JSON consciousness files. In-memory when unset.
    pub consciousness_dir: Option<PathBuf>,
}

/// One agent entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
    /// Persona and standing orders, placed in the system prompt.
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Tools executed by a client rather than in-process.
    #[serde(default)]
    pub external_tools: Vec<ExternalToolSpec>,
}

impl AgentConfig {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            instructions: String::new(),
            model: None,
            external_tools: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

// ============================================================
// Defaults
// ============================================================

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            max_consciousness_tokens: 60_000,
            min_retained_cycles: 6,
            error_pause_ms: 2_000,
            active_space_policy: ActiveSpacePolicy::ResetPerCycle,
            model: "claude-sonnet-4-20250514".to_string(),
            max_output_tokens: 4_096,
        }
    }
}

impl Default for MentionConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_reply_stack: 5,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 1_000 }
    }
}

// ============================================================
// Loading
// ============================================================

impl AgoraConfig {
    /// Load from a TOML file. Falls back to defaults if the file is
    /// missing or unparsable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Serialize to TOML (for `agora dump-config`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn agent(&self, id: &EntityId) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| &a.id == id)
    }

    /// Model for an agent: its override, else the process default.
    pub fn model_for(&self, agent: &AgentConfig) -> String {
        agent
            .model
            .clone()
            .unwrap_or_else(|| self.process.model.clone())
    }
}
