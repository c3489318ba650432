//! Block state tracker
//!
//! Turns the flat, possibly malformed event sequence emitted by an agent into
//! well-formed block spans: every block is opened once, receives content while
//! open, and is closed exactly once. All three output encoders consume the
//! resulting `BlockTransition`s, so framing decisions are made in one place.
//!
//! At most one block is open at a time. Opening a block of any kind closes the
//! block that is currently open, which keeps fences strictly nested in the
//! linear text encoders.

use crate::event::{Event, EventKind, Phase, Role};
use serde::Serialize;
use std::fmt;

/// Default fallback format for code blocks that arrive without one
pub const DEFAULT_CODE_FORMAT: &str = "text";

/// Kind of a tracked block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Message,
    Code,
    Console,
    Confirmation,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Message => "message",
            BlockKind::Code => "code",
            BlockKind::Console => "console",
            BlockKind::Confirmation => "confirmation",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change of a tracked block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockTransition {
    Opened {
        kind: BlockKind,
        id: String,
        role: Role,
        format: Option<String>,
    },
    Appended {
        kind: BlockKind,
        id: String,
        text: String,
        /// Content that came from an event kind the relay does not understand
        flagged: bool,
    },
    Closed {
        kind: BlockKind,
        id: String,
    },
    /// Currently executing line of the latest code block; ignored by the
    /// text encoders
    ActiveLine { line: Option<usize> },
}

impl BlockTransition {
    pub fn kind(&self) -> Option<BlockKind> {
        match self {
            BlockTransition::Opened { kind, .. }
            | BlockTransition::Appended { kind, .. }
            | BlockTransition::Closed { kind, .. } => Some(*kind),
            BlockTransition::ActiveLine { .. } => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            BlockTransition::Opened { id, .. }
            | BlockTransition::Appended { id, .. }
            | BlockTransition::Closed { id, .. } => Some(id),
            BlockTransition::ActiveLine { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenBlock {
    kind: BlockKind,
    id: String,
    role: Role,
}

/// Per-response block state machine
#[derive(Debug)]
pub struct BlockTracker {
    default_format: String,
    id_prefix: String,
    open: Option<OpenBlock>,
    next_seq: u64,
    recoveries: usize,
}

impl Default for BlockTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_FORMAT)
    }
}

impl BlockTracker {
    /// Create a tracker that labels format-less code blocks with `default_format`
    pub fn new(default_format: impl Into<String>) -> Self {
        Self {
            default_format: default_format.into(),
            id_prefix: "blk".to_string(),
            open: None,
            next_seq: 0,
            recoveries: 0,
        }
    }

    /// Scope synthesized block ids to a response id
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Number of malformed inputs recovered so far
    pub fn recoveries(&self) -> usize {
        self.recoveries
    }

    /// Whether a block is currently open
    pub fn has_open_block(&self) -> bool {
        self.open.is_some()
    }

    /// Kind and id of the open block, if any
    pub fn open_block(&self) -> Option<(BlockKind, &str)> {
        self.open.as_ref().map(|b| (b.kind, b.id.as_str()))
    }

    /// Feed one event, returning the transitions it causes
    pub fn advance(&mut self, event: Event) -> Vec<BlockTransition> {
        let mut out = Vec::new();

        if event.role == Role::User && event.kind != EventKind::ActiveLine {
            let flagged = event.kind == EventKind::Unknown;
            self.atomic(BlockKind::Message, event, flagged, &mut out);
            return out;
        }

        match event.kind {
            EventKind::Message => self.message(event, false, &mut out),
            EventKind::Unknown => {
                if event.content.is_empty() {
                    tracing::debug!(role = %event.role, "Dropping empty event of unknown kind");
                } else {
                    self.recover("unknown event kind passed through as message");
                    self.message(event, true, &mut out);
                }
            }
            EventKind::Code => self.fenced(BlockKind::Code, event, &mut out),
            EventKind::Console => self.fenced(BlockKind::Console, event, &mut out),
            EventKind::Confirmation => self.atomic(BlockKind::Confirmation, event, false, &mut out),
            EventKind::ActiveLine => out.push(BlockTransition::ActiveLine {
                line: event.line_number(),
            }),
        }

        out
    }

    /// Force-close whatever is still open. Calling this again is a no-op.
    pub fn finish(&mut self) -> Vec<BlockTransition> {
        let mut out = Vec::new();
        if let Some(block) = &self.open {
            if block.kind != BlockKind::Message {
                tracing::debug!(kind = %block.kind, id = %block.id, "Force-closing block at end of stream");
            }
        }
        self.close_open(&mut out);
        out
    }

    fn message(&mut self, event: Event, flagged: bool, out: &mut Vec<BlockTransition>) {
        let continues = match (&self.open, &event.id) {
            (Some(open), Some(id)) => {
                open.kind == BlockKind::Message && open.role == event.role && &open.id == id
            }
            (Some(open), None) => open.kind == BlockKind::Message && open.role == event.role,
            (None, _) => false,
        };

        if !continues {
            self.close_open(out);
            let id = self.open_new(BlockKind::Message, event.id, event.role);
            out.push(BlockTransition::Opened {
                kind: BlockKind::Message,
                id,
                role: event.role,
                format: event.format,
            });
        }

        if let Some(open) = &self.open {
            out.push(BlockTransition::Appended {
                kind: BlockKind::Message,
                id: open.id.clone(),
                text: event.content,
                flagged,
            });
        }
    }

    fn fenced(&mut self, kind: BlockKind, event: Event, out: &mut Vec<BlockTransition>) {
        match event.phase {
            Phase::Start => {
                if self.is_open(kind, None) {
                    self.recover("duplicate start; closing previous block first");
                }
                self.close_open(out);
                self.open_fenced(kind, &event, out);
                self.append(kind, event.content, out);
            }
            Phase::Continue => {
                if event.content.is_empty() {
                    return;
                }
                self.ensure_open(kind, &event, out);
                self.append(kind, event.content, out);
            }
            Phase::End => {
                if !event.content.is_empty() {
                    self.ensure_open(kind, &event, out);
                    self.append(kind, event.content, out);
                }
                if self.is_open(kind, event.id.as_deref()) {
                    self.close_open(out);
                } else {
                    self.recover("end without a matching open block");
                }
            }
        }
    }

    /// Confirmations and user messages are never streamed as partial blocks.
    fn atomic(
        &mut self,
        kind: BlockKind,
        event: Event,
        flagged: bool,
        out: &mut Vec<BlockTransition>,
    ) {
        if event.content.is_empty() {
            tracing::debug!(kind = %kind, "Skipping empty atomic block");
            return;
        }
        self.close_open(out);
        let id = self.open_new(kind, event.id, event.role);
        out.push(BlockTransition::Opened {
            kind,
            id: id.clone(),
            role: event.role,
            format: event.format,
        });
        out.push(BlockTransition::Appended {
            kind,
            id: id.clone(),
            text: event.content,
            flagged,
        });
        self.open = None;
        out.push(BlockTransition::Closed { kind, id });
    }

    fn ensure_open(&mut self, kind: BlockKind, event: &Event, out: &mut Vec<BlockTransition>) {
        if self.is_open(kind, event.id.as_deref()) {
            return;
        }
        self.recover("content without a preceding start; synthesizing one");
        self.close_open(out);
        self.open_fenced(kind, event, out);
    }

    fn open_fenced(&mut self, kind: BlockKind, event: &Event, out: &mut Vec<BlockTransition>) {
        let format = match kind {
            BlockKind::Code => Some(
                event
                    .format
                    .clone()
                    .filter(|f| !f.is_empty())
                    .unwrap_or_else(|| self.default_format.clone()),
            ),
            _ => event.format.clone(),
        };
        let id = self.open_new(kind, event.id.clone(), event.role);
        out.push(BlockTransition::Opened {
            kind,
            id,
            role: event.role,
            format,
        });
    }

    fn append(&self, kind: BlockKind, text: String, out: &mut Vec<BlockTransition>) {
        if text.is_empty() {
            return;
        }
        if let Some(open) = &self.open {
            out.push(BlockTransition::Appended {
                kind,
                id: open.id.clone(),
                text,
                flagged: false,
            });
        }
    }

    fn is_open(&self, kind: BlockKind, id: Option<&str>) -> bool {
        match &self.open {
            Some(open) => open.kind == kind && id.map_or(true, |id| id == open.id),
            None => false,
        }
    }

    fn open_new(&mut self, kind: BlockKind, id: Option<String>, role: Role) -> String {
        let id = id.filter(|id| !id.is_empty()).unwrap_or_else(|| {
            self.next_seq += 1;
            format!("{}-{}-{}", self.id_prefix, kind, self.next_seq)
        });
        self.open = Some(OpenBlock {
            kind,
            id: id.clone(),
            role,
        });
        id
    }

    fn close_open(&mut self, out: &mut Vec<BlockTransition>) {
        if let Some(block) = self.open.take() {
            out.push(BlockTransition::Closed {
                kind: block.kind,
                id: block.id,
            });
        }
    }

    fn recover(&mut self, what: &str) {
        self.recoveries += 1;
        tracing::debug!(recoveries = self.recoveries, "Recovered malformed event: {what}");
    }
}

/// Run a complete event sequence through a fresh tracker, including the
/// end-of-stream force-close.
pub fn track_all(
    events: impl IntoIterator<Item = Event>,
    default_format: &str,
) -> Vec<BlockTransition> {
    let mut tracker = BlockTracker::new(default_format);
    let mut transitions = Vec::new();
    for event in events {
        transitions.extend(tracker.advance(event));
    }
    transitions.extend(tracker.finish());
    transitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn opened(kind: BlockKind, id: &str, format: Option<&str>) -> BlockTransition {
        BlockTransition::Opened {
            kind,
            id: id.to_string(),
            role: Role::Assistant,
            format: format.map(str::to_string),
        }
    }

    fn appended(kind: BlockKind, id: &str, text: &str) -> BlockTransition {
        BlockTransition::Appended {
            kind,
            id: id.to_string(),
            text: text.to_string(),
            flagged: false,
        }
    }

    fn closed(kind: BlockKind, id: &str) -> BlockTransition {
        BlockTransition::Closed {
            kind,
            id: id.to_string(),
        }
    }

    fn balance(transitions: &[BlockTransition]) -> HashMap<(BlockKind, String), i32> {
        let mut counts = HashMap::new();
        for t in transitions {
            match t {
                BlockTransition::Opened { kind, id, .. } => {
                    *counts.entry((*kind, id.clone())).or_insert(0) += 1
                }
                BlockTransition::Closed { kind, id } => {
                    *counts.entry((*kind, id.clone())).or_insert(0) -= 1
                }
                _ => {}
            }
        }
        counts
    }

    #[test]
    fn test_message_then_code() {
        let transitions = track_all(
            vec![
                Event::message("Hello "),
                Event::message("world"),
                Event::code_start("sh"),
                Event::code("ls -la"),
                Event::code_end(),
            ],
            "text",
        );

        assert_eq!(
            transitions,
            vec![
                opened(BlockKind::Message, "blk-message-1", None),
                appended(BlockKind::Message, "blk-message-1", "Hello "),
                appended(BlockKind::Message, "blk-message-1", "world"),
                closed(BlockKind::Message, "blk-message-1"),
                opened(BlockKind::Code, "blk-code-2", Some("sh")),
                BlockTransition::Appended {
                    kind: BlockKind::Code,
                    id: "blk-code-2".to_string(),
                    text: "ls -la".to_string(),
                    flagged: false,
                },
                closed(BlockKind::Code, "blk-code-2"),
            ]
        );
    }

    #[test]
    fn test_console_without_end_is_force_closed() {
        let mut tracker = BlockTracker::default();
        let mut transitions = tracker.advance(Event::console_start());
        transitions.extend(tracker.advance(Event::console("42")));
        assert!(tracker.has_open_block());

        let tail = tracker.finish();
        assert_eq!(tail, vec![closed(BlockKind::Console, "blk-console-1")]);
        assert!(!tracker.has_open_block());
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut tracker = BlockTracker::default();
        tracker.advance(Event::code_start("python"));
        tracker.advance(Event::code("print(1)"));
        assert_eq!(tracker.finish().len(), 1);
        assert!(tracker.finish().is_empty());
        assert!(tracker.finish().is_empty());
    }

    #[test]
    fn test_content_before_start_synthesizes_open() {
        let mut tracker = BlockTracker::new("python");
        let transitions = tracker.advance(Event::code("x = 1"));
        assert_eq!(
            transitions,
            vec![
                opened(BlockKind::Code, "blk-code-1", Some("python")),
                appended(BlockKind::Code, "blk-code-1", "x = 1"),
            ]
        );
        assert_eq!(tracker.recoveries(), 1);
    }

    #[test]
    fn test_duplicate_start_closes_then_reopens() {
        let transitions = track_all(
            vec![
                Event::code_start("sh"),
                Event::code("echo a"),
                Event::code_start("sh"),
                Event::code("echo b"),
                Event::code_end(),
            ],
            "text",
        );
        assert_eq!(
            transitions,
            vec![
                opened(BlockKind::Code, "blk-code-1", Some("sh")),
                appended(BlockKind::Code, "blk-code-1", "echo a"),
                closed(BlockKind::Code, "blk-code-1"),
                opened(BlockKind::Code, "blk-code-2", Some("sh")),
                appended(BlockKind::Code, "blk-code-2", "echo b"),
                closed(BlockKind::Code, "blk-code-2"),
            ]
        );
    }

    #[test]
    fn test_end_without_open_is_noop() {
        let mut tracker = BlockTracker::default();
        assert!(tracker.advance(Event::console_end()).is_empty());
        assert_eq!(tracker.recoveries(), 1);
    }

    #[test]
    fn test_code_without_format_uses_default() {
        let transitions = track_all(vec![Event::new(EventKind::Code, Phase::Start, "")], "bash");
        assert_eq!(transitions[0], opened(BlockKind::Code, "blk-code-1", Some("bash")));
    }

    #[test]
    fn test_confirmation_is_atomic() {
        let mut tracker = BlockTracker::default();
        tracker.advance(Event::message("About to run"));
        let transitions = tracker.advance(Event::confirmation("Run `rm -rf build`?"));
        assert_eq!(
            transitions,
            vec![
                closed(BlockKind::Message, "blk-message-1"),
                opened(BlockKind::Confirmation, "blk-confirmation-2", None),
                appended(BlockKind::Confirmation, "blk-confirmation-2", "Run `rm -rf build`?"),
                closed(BlockKind::Confirmation, "blk-confirmation-2"),
            ]
        );
        assert!(!tracker.has_open_block());
    }

    #[test]
    fn test_active_line_has_no_block_effect() {
        let mut tracker = BlockTracker::default();
        tracker.advance(Event::code_start("python"));
        let transitions = tracker.advance(Event::active_line(Some(2)));
        assert_eq!(transitions, vec![BlockTransition::ActiveLine { line: Some(2) }]);
        assert_eq!(tracker.open_block().map(|(k, _)| k), Some(BlockKind::Code));
    }

    #[test]
    fn test_unknown_kind_passes_through_flagged() {
        let mut tracker = BlockTracker::default();
        let transitions = tracker.advance(Event::unknown("<image bytes>"));
        assert_eq!(transitions.len(), 2);
        assert_eq!(
            transitions[1],
            BlockTransition::Appended {
                kind: BlockKind::Message,
                id: "blk-message-1".to_string(),
                text: "<image bytes>".to_string(),
                flagged: true,
            }
        );
        assert!(tracker.advance(Event::unknown("")).is_empty());
    }

    #[test]
    fn test_message_id_change_splits_block() {
        let transitions = track_all(
            vec![
                Event::message("a").with_id("m1"),
                Event::message("b").with_id("m1"),
                Event::message("c").with_id("m2"),
            ],
            "text",
        );
        assert_eq!(
            transitions,
            vec![
                opened(BlockKind::Message, "m1", None),
                appended(BlockKind::Message, "m1", "a"),
                appended(BlockKind::Message, "m1", "b"),
                closed(BlockKind::Message, "m1"),
                opened(BlockKind::Message, "m2", None),
                appended(BlockKind::Message, "m2", "c"),
                closed(BlockKind::Message, "m2"),
            ]
        );
    }

    #[test]
    fn test_user_message_is_closed_on_creation() {
        let mut tracker = BlockTracker::default();
        let transitions = tracker.advance(Event::message("list files").with_role(Role::User));
        assert_eq!(transitions.len(), 3);
        assert!(matches!(
            &transitions[0],
            BlockTransition::Opened { role: Role::User, .. }
        ));
        assert!(matches!(transitions[2], BlockTransition::Closed { .. }));
        assert!(!tracker.has_open_block());
    }

    #[test]
    fn test_user_unknown_event_stays_flagged() {
        let mut tracker = BlockTracker::default();
        let transitions = tracker.advance(Event::unknown("<image>").with_role(Role::User));
        assert_eq!(transitions.len(), 3);
        assert!(matches!(
            &transitions[1],
            BlockTransition::Appended { flagged: true, text, .. } if text == "<image>"
        ));

        let plain = tracker.advance(Event::message("hi").with_role(Role::User));
        assert!(matches!(&plain[1], BlockTransition::Appended { flagged: false, .. }));
    }

    #[test]
    fn test_message_after_code_closes_code() {
        let transitions = track_all(
            vec![Event::code_start("sh"), Event::code("ls"), Event::message("done")],
            "text",
        );
        assert_eq!(transitions[2], closed(BlockKind::Code, "blk-code-1"));
        assert!(balance(&transitions).values().all(|c| *c == 0));
    }

    #[test]
    fn test_balanced_for_malformed_sequences() {
        let sequences = vec![
            vec![Event::console("orphan"), Event::code("orphan code")],
            vec![Event::code_start("sh"), Event::code_start("sh"), Event::code_start("sh")],
            vec![Event::code_end(), Event::console_end(), Event::message("x")],
            vec![
                Event::message("a"),
                Event::unknown("b"),
                Event::confirmation("c"),
                Event::console_start(),
                Event::code("d"),
            ],
            vec![Event::code("x").with_id("a"), Event::code("y").with_id("b")],
        ];

        for events in sequences {
            let transitions = track_all(events, "text");
            for (key, count) in balance(&transitions) {
                assert_eq!(count, 0, "unbalanced block {:?}", key);
            }
        }
    }

    #[test]
    fn test_end_with_trailing_content() {
        let transitions = track_all(
            vec![
                Event::code_start("sh"),
                Event::new(EventKind::Code, Phase::End, "pwd"),
            ],
            "text",
        );
        assert_eq!(
            transitions,
            vec![
                opened(BlockKind::Code, "blk-code-1", Some("sh")),
                appended(BlockKind::Code, "blk-code-1", "pwd"),
                closed(BlockKind::Code, "blk-code-1"),
            ]
        );
    }

    #[test]
    fn test_id_prefix_scopes_synthesized_ids() {
        let mut tracker = BlockTracker::default().with_id_prefix("chatcmpl-1");
        let transitions = tracker.advance(Event::message("x"));
        assert_eq!(transitions[0].id(), Some("chatcmpl-1-message-1"));
    }
}
