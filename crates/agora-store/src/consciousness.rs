//! Consciousness repository: whole-document load/replace of an agent's history

use agora_core::{EntityId, Error, Result};
use agora_llm::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// The persisted memory of one agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConsciousnessRecord {
    pub entity_id: EntityId,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub cycle_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConsciousnessRecord {
    pub fn empty(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            messages: Vec::new(),
            cycle_count: 0,
            updated_at: None,
        }
    }
}

#[async_trait::async_trait]
pub trait ConsciousnessRepo: Send + Sync {
    /// The stored record, or an empty one for a new entity.
    async fn load(&self, entity_id: &EntityId) -> Result<ConsciousnessRecord>;

    /// Replace the stored record.
    async fn save(&self, record: &ConsciousnessRecord) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

pub struct MemoryConsciousnessRepo {
    records: DashMap<EntityId, ConsciousnessRecord>,
    available: AtomicBool,
}

impl Default for MemoryConsciousnessRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConsciousnessRepo {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Make `save` fail with `StoreUnavailable` until switched back on.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ConsciousnessRepo for MemoryConsciousnessRepo {
    async fn load(&self, entity_id: &EntityId) -> Result<ConsciousnessRecord> {
        Ok(self
            .records
            .get(entity_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| ConsciousnessRecord::empty(entity_id.clone())))
    }

    async fn save(&self, record: &ConsciousnessRecord) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("consciousness store offline"));
        }
        self.records
            .insert(record.entity_id.clone(), record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per entity under a directory. Writes go to a
/// temp file first and are renamed into place, so a crash never leaves a
/// half-written document.
pub struct FileConsciousnessRepo {
    dir: PathBuf,
}

impl FileConsciousnessRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, entity_id: &EntityId) -> PathBuf {
        let safe: String = entity_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait::async_trait]
impl ConsciousnessRepo for FileConsciousnessRepo {
    async fn load(&self, entity_id: &EntityId) -> Result<ConsciousnessRecord> {
        let path = self.path_for(entity_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ConsciousnessRecord::empty(entity_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, record: &ConsciousnessRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.entity_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(entity = %record.entity_id, path = %path.display(), "consciousness saved");
        Ok(())
    }
}
