//! Memory Store domain model (spec §3, §4.11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Note,
    Decision,
    Task,
    Reference,
    Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub tags: HashSet<String>,
    pub author: String,
    pub project_id: Option<Uuid>,
    pub related_chunks: HashSet<Uuid>,
    pub resource_links: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn is_visible(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Patch applied by `MemoryStore::Update` (spec §4.11). `None` means
/// "leave unchanged"; this is distinct from clearing a field, which spec
/// does not require.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub tags: Option<HashSet<String>>,
    pub related_chunks: Option<HashSet<Uuid>>,
    pub resource_links: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryListFilters {
    pub project_id: Option<Uuid>,
    pub memory_type: Option<MemoryType>,
    /// Any-of match against `tags`.
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub include_deleted: bool,
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_deleted_memory_is_not_visible() {
        let mut m = sample();
        assert!(m.is_visible());
        m.deleted_at = Some(Utc::now());
        assert!(!m.is_visible());
    }

    fn sample() -> Memory {
        Memory {
            id: Uuid::new_v4(),
            title: "t".into(),
            content: "c".into(),
            memory_type: MemoryType::Note,
            tags: HashSet::new(),
            author: "a".into(),
            project_id: None,
            related_chunks: HashSet::new(),
            resource_links: vec![],
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }
}
