//! Node-by-id conversation document
//!
//! The renderer folds block transitions into an ordered list of nodes. Only
//! the most recent node can be open; every other node is frozen. Each change
//! is also recorded as a `DocumentUpdate` so a rendering surface can replace
//! nodes by key instead of re-parsing the whole transcript.

use std::collections::HashMap;

use serde::Serialize;

use super::markup::{self, Markup, MarkupBlock, Span};
use crate::event::Role;
use crate::tracker::{BlockKind, BlockTransition};

/// Whether a node can still change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Open,
    Frozen,
}

/// One rendered block of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentNode {
    /// Unique key of the node within the document
    pub id: String,
    /// Id of the block this node was built from
    pub block_id: String,
    pub role: Role,
    pub kind: BlockKind,
    pub format: Option<String>,
    pub content: String,
    pub state: NodeState,
    /// Carries content of a kind the relay does not understand
    pub flagged: bool,
    /// Currently executing line (1-based), for code nodes
    pub active_line: Option<usize>,
}

impl DocumentNode {
    pub fn is_open(&self) -> bool {
        self.state == NodeState::Open
    }

    /// Structured rendering of this node's content
    pub fn markup(&self) -> Markup {
        match self.kind {
            BlockKind::Message => markup::render(&self.content),
            BlockKind::Code | BlockKind::Console => Markup {
                blocks: vec![MarkupBlock::Code {
                    language: self.format.clone(),
                    code: self.content.clone(),
                }],
            },
            BlockKind::Confirmation => Markup {
                blocks: vec![MarkupBlock::Paragraph(vec![Span::plain(self.content.trim())])],
            },
        }
    }
}

/// A change to the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentUpdate {
    /// Insert the node, or replace the node with the same id
    Upsert(DocumentNode),
    /// The node with this id will not change again
    Freeze { id: String },
    /// Execution moved to `line` of a code node; `None` clears the marker.
    /// Frozen nodes still receive this, their content stays as it was.
    ActiveLine { id: String, line: Option<usize> },
}

/// Ordered list of rendered nodes
#[derive(Debug, Clone, Default)]
pub struct RenderedDocument {
    nodes: Vec<DocumentNode>,
}

impl RenderedDocument {
    pub fn nodes(&self) -> &[DocumentNode] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&DocumentNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The in-progress node, if any
    pub fn open_node(&self) -> Option<&DocumentNode> {
        self.nodes.last().filter(|n| n.is_open())
    }
}

/// Folds block transitions into a `RenderedDocument`
#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    document: RenderedDocument,
    updates: Vec<DocumentUpdate>,
    /// How many nodes have been created per block id
    generations: HashMap<String, usize>,
    user_seq: u64,
}

impl TranscriptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &RenderedDocument {
        &self.document
    }

    /// Drain the updates produced since the last call
    pub fn updates(&mut self) -> Vec<DocumentUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// Add a user-authored message, frozen on creation
    pub fn user_message(&mut self, text: impl Into<String>) -> String {
        self.freeze_open();
        self.user_seq += 1;
        let block_id = format!("user-{}", self.user_seq);
        let id = self.node_key(&block_id);
        let node = DocumentNode {
            id: id.clone(),
            block_id,
            role: Role::User,
            kind: BlockKind::Message,
            format: None,
            content: text.into(),
            state: NodeState::Frozen,
            flagged: false,
            active_line: None,
        };
        self.updates.push(DocumentUpdate::Upsert(node.clone()));
        self.updates.push(DocumentUpdate::Freeze { id: id.clone() });
        self.document.nodes.push(node);
        id
    }

    /// Apply one transition
    pub fn apply(&mut self, transition: &BlockTransition) {
        match transition {
            BlockTransition::Opened {
                kind,
                id,
                role,
                format,
            } => {
                self.freeze_open();
                self.open_node(*kind, id, *role, format.clone());
            }
            BlockTransition::Appended {
                kind,
                id,
                text,
                flagged,
            } => self.append(*kind, id, text, *flagged),
            BlockTransition::Closed { id, .. } => {
                let matches = self
                    .document
                    .open_node()
                    .map(|n| n.block_id == *id)
                    .unwrap_or(false);
                if matches {
                    self.freeze_open();
                } else {
                    tracing::debug!(block = %id, "Close for a block that is not open");
                }
            }
            BlockTransition::ActiveLine { line } => self.active_line(*line),
        }
    }

    /// Force-close the open node, if any
    pub fn finish(&mut self) {
        self.freeze_open();
    }

    fn node_key(&mut self, block_id: &str) -> String {
        let generation = self.generations.entry(block_id.to_string()).or_insert(0);
        *generation += 1;
        if *generation == 1 {
            block_id.to_string()
        } else {
            format!("{block_id}#{generation}")
        }
    }

    fn open_node(&mut self, kind: BlockKind, block_id: &str, role: Role, format: Option<String>) {
        let id = self.node_key(block_id);
        let node = DocumentNode {
            id,
            block_id: block_id.to_string(),
            role,
            kind,
            format,
            content: String::new(),
            state: NodeState::Open,
            flagged: false,
            active_line: None,
        };
        self.updates.push(DocumentUpdate::Upsert(node.clone()));
        self.document.nodes.push(node);
    }

    fn append(&mut self, kind: BlockKind, block_id: &str, text: &str, flagged: bool) {
        let targets_open = self
            .document
            .open_node()
            .map(|n| n.block_id == block_id)
            .unwrap_or(false);

        if !targets_open {
            if text.is_empty() {
                return;
            }
            // Late content for a frozen (or never opened) block starts a new node.
            let previous = self
                .document
                .nodes
                .iter()
                .rev()
                .find(|n| n.block_id == block_id)
                .map(|n| (n.role, n.format.clone()));
            let (role, format) = previous.unwrap_or((Role::Assistant, None));
            tracing::debug!(block = %block_id, "Appending to a closed block; opening a new node");
            self.freeze_open();
            self.open_node(kind, block_id, role, format);
        }

        if text.is_empty() && !flagged {
            return;
        }
        if let Some(node) = self.document.nodes.last_mut() {
            node.content.push_str(text);
            node.flagged |= flagged;
            self.updates.push(DocumentUpdate::Upsert(node.clone()));
        }
    }

    fn active_line(&mut self, line: Option<usize>) {
        let Some(node) = self
            .document
            .nodes
            .iter_mut()
            .rev()
            .find(|n| n.kind == BlockKind::Code)
        else {
            return;
        };
        if node.active_line != line {
            node.active_line = line;
            self.updates.push(DocumentUpdate::ActiveLine {
                id: node.id.clone(),
                line,
            });
        }
    }

    fn freeze_open(&mut self) {
        if let Some(node) = self.document.nodes.last_mut() {
            if node.is_open() {
                node.state = NodeState::Frozen;
                self.updates.push(DocumentUpdate::Freeze {
                    id: node.id.clone(),
                });
            }
        }
    }
}
