//! Event model for agent output
//!
//! An agent emits a flat sequence of `Event`s. Each event is a fragment of a
//! block (message text, source code, execution output, ...) tagged with the
//! phase of that block's lifecycle. Events are ephemeral: the block tracker
//! consumes them and only its transitions survive.
//!
//! The JSON form uses snake_case values and accepts `type` as an alias for
//! `kind`, so agents speaking the LMC-style message dialect can be read
//! directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What an event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Prose from the agent (markdown)
    Message,
    /// Source code the agent is about to run
    Code,
    /// Output produced by running code
    Console,
    /// A request for the user to approve an action
    Confirmation,
    /// Marker for the line of code currently executing
    ActiveLine,
    /// Anything this relay does not understand
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Code => "code",
            EventKind::Console => "console",
            EventKind::Confirmation => "confirmation",
            EventKind::ActiveLine => "active_line",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Assistant,
    Computer,
    User,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Assistant => "assistant",
            Role::Computer => "computer",
            Role::User => "user",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle marker of the block an event belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    #[default]
    Continue,
    End,
}

/// A single unit of agent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireEvent")]
pub struct Event {
    #[serde(alias = "type")]
    pub kind: EventKind,

    #[serde(default)]
    pub role: Role,

    /// Text fragment, possibly empty
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub phase: Phase,

    /// Language or format tag (e.g. the source language of a code block)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Correlation id; synthesized by the tracker when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Accepted JSON form; `start`/`end` flags stand in for `phase` when it is
/// absent
#[derive(Deserialize)]
struct WireEvent {
    #[serde(alias = "type")]
    kind: EventKind,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    phase: Option<Phase>,
    #[serde(default)]
    start: bool,
    #[serde(default)]
    end: bool,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        let phase = wire.phase.unwrap_or(match (wire.start, wire.end) {
            (true, _) => Phase::Start,
            (false, true) => Phase::End,
            (false, false) => Phase::Continue,
        });
        Self {
            kind: wire.kind,
            role: wire.role,
            content: wire.content,
            phase,
            format: wire.format,
            id: wire.id,
        }
    }
}

impl Event {
    /// Create an event of the given kind and phase with default role
    pub fn new(kind: EventKind, phase: Phase, content: impl Into<String>) -> Self {
        let role = match kind {
            EventKind::Console | EventKind::ActiveLine => Role::Computer,
            _ => Role::Assistant,
        };
        Self {
            kind,
            role,
            content: content.into(),
            phase,
            format: None,
            id: None,
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self::new(EventKind::Message, Phase::Continue, content)
    }

    pub fn code_start(format: impl Into<String>) -> Self {
        Self::new(EventKind::Code, Phase::Start, "").with_format(format)
    }

    pub fn code(content: impl Into<String>) -> Self {
        Self::new(EventKind::Code, Phase::Continue, content)
    }

    pub fn code_end() -> Self {
        Self::new(EventKind::Code, Phase::End, "")
    }

    pub fn console_start() -> Self {
        Self::new(EventKind::Console, Phase::Start, "")
    }

    pub fn console(content: impl Into<String>) -> Self {
        Self::new(EventKind::Console, Phase::Continue, content)
    }

    pub fn console_end() -> Self {
        Self::new(EventKind::Console, Phase::End, "")
    }

    pub fn confirmation(content: impl Into<String>) -> Self {
        Self::new(EventKind::Confirmation, Phase::Continue, content)
    }

    /// Marker for the currently executing line; `None` clears it
    pub fn active_line(line: Option<usize>) -> Self {
        let content = line.map(|l| l.to_string()).unwrap_or_default();
        Self::new(EventKind::ActiveLine, Phase::Continue, content)
    }

    pub fn unknown(content: impl Into<String>) -> Self {
        Self::new(EventKind::Unknown, Phase::Continue, content)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Line number carried by an `active_line` event, if any
    pub fn line_number(&self) -> Option<usize> {
        self.content.trim().parse().ok()
    }
}
