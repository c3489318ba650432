//! Conversation history and its persistence
//!
//! Agents keep the conversation as a list of `HistoryEntry` records. A
//! `HistoryStore` mirrors that list somewhere durable; a failing store is what
//! makes a history restore fail.

use crate::error::{RelayError, Result};
use crate::event::{Event, EventKind, Role};
use crate::tracker::{track_all, BlockKind, BlockTransition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One completed block of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub kind: EventKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl HistoryEntry {
    pub fn new(role: Role, kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            content: content.into(),
            format: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, EventKind::Message, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, EventKind::Message, content)
    }
}

fn event_kind(kind: BlockKind) -> EventKind {
    match kind {
        BlockKind::Message => EventKind::Message,
        BlockKind::Code => EventKind::Code,
        BlockKind::Console => EventKind::Console,
        BlockKind::Confirmation => EventKind::Confirmation,
    }
}

/// Fold emitted events into completed history entries, one per block.
/// Blocks without content are omitted.
pub fn collect_entries(events: impl IntoIterator<Item = Event>, default_format: &str) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    let mut current: Option<HistoryEntry> = None;

    for transition in track_all(events, default_format) {
        match transition {
            BlockTransition::Opened {
                kind, role, format, ..
            } => {
                current = Some(HistoryEntry {
                    role,
                    kind: event_kind(kind),
                    content: String::new(),
                    format,
                });
            }
            BlockTransition::Appended { text, .. } => {
                if let Some(entry) = current.as_mut() {
                    entry.content.push_str(&text);
                }
            }
            BlockTransition::Closed { .. } => {
                if let Some(entry) = current.take() {
                    if !entry.content.is_empty() {
                        entries.push(entry);
                    }
                }
            }
            BlockTransition::ActiveLine { .. } => {}
        }
    }

    entries
}

/// Durable mirror of an agent's history
pub trait HistoryStore: Send + Sync {
    fn save(&self, history: &[HistoryEntry]) -> Result<()>;

    fn load(&self) -> Result<Vec<HistoryEntry>>;
}

/// JSON file-based history store
///
/// Writes go to a temp file that is renamed over the target, so a crash never
/// leaves a half-written history behind.
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for FileHistoryStore {
    fn save(&self, history: &[HistoryEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(history)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RelayError::Store(format!(
                    "Failed to create history directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            RelayError::Store(format!(
                "Failed to write history file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            RelayError::Store(format!(
                "Failed to rename history file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), entries = history.len(), "History saved");
        Ok(())
    }

    fn load(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            RelayError::Store(format!(
                "Failed to read history file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let history: Vec<HistoryEntry> = serde_json::from_str(&json).map_err(|e| {
            RelayError::Store(format!(
                "Failed to parse history file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), entries = history.len(), "History loaded");
        Ok(history)
    }
}

/// In-memory history store
#[derive(Default)]
pub struct MemoryHistoryStore {
    history: std::sync::RwLock<Vec<HistoryEntry>>,
}

impl HistoryStore for MemoryHistoryStore {
    fn save(&self, history: &[HistoryEntry]) -> Result<()> {
        let mut stored = self
            .history
            .write()
            .map_err(|e| RelayError::Store(format!("Failed to acquire history lock: {}", e)))?;
        *stored = history.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Vec<HistoryEntry>> {
        let stored = self
            .history
            .read()
            .map_err(|e| RelayError::Store(format!("Failed to acquire history lock: {}", e)))?;
        Ok(stored.clone())
    }
}
