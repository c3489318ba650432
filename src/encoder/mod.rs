//! Text encoders for block transitions
//!
//! The SSE and aggregate encoders share one mapping from transition to text
//! fragment, so the concatenation of every streamed delta always equals the
//! aggregated response for the same events.

pub mod aggregate;
pub mod sse;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::tracker::{BlockKind, BlockTransition};

/// Closing fence of code and console blocks
pub const FENCE_CLOSE: &str = "\n```\n";

/// Opening fence of console (execution output) blocks
pub const CONSOLE_FENCE_OPEN: &str = "\nOutput:\n```\n";

/// Prefix introducing a confirmation prompt
pub const CONFIRMATION_PREFIX: &str = "\nConfirmation required: ";

/// Why a response ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Error => "error",
        }
    }
}

/// Text contributed by a transition to a linear (markdown) rendering
pub fn fragment(transition: &BlockTransition) -> Option<String> {
    match transition {
        BlockTransition::Opened { kind, format, .. } => match kind {
            BlockKind::Message => None,
            BlockKind::Code => Some(format!("\n```{}\n", format.as_deref().unwrap_or_default())),
            BlockKind::Console => Some(CONSOLE_FENCE_OPEN.to_string()),
            BlockKind::Confirmation => Some(CONFIRMATION_PREFIX.to_string()),
        },
        BlockTransition::Appended { text, .. } if !text.is_empty() => Some(text.clone()),
        BlockTransition::Appended { .. } => None,
        BlockTransition::Closed { kind, .. } => match kind {
            BlockKind::Message => None,
            BlockKind::Code | BlockKind::Console => Some(FENCE_CLOSE.to_string()),
            BlockKind::Confirmation => Some("\n".to_string()),
        },
        BlockTransition::ActiveLine { .. } => None,
    }
}

/// Human-readable trailer appended to output cut short by an agent error
pub fn error_suffix(message: &str) -> String {
    format!("\n\nError: {message}\n")
}

/// Message shown to clients for a failed invocation
pub fn failure_message(err: &RelayError) -> String {
    match err {
        RelayError::Execution(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Role;

    #[test]
    fn test_fragment_fences() {
        let open_code = BlockTransition::Opened {
            kind: BlockKind::Code,
            id: "c".to_string(),
            role: Role::Assistant,
            format: Some("python".to_string()),
        };
        assert_eq!(fragment(&open_code).as_deref(), Some("\n```python\n"));

        let open_console = BlockTransition::Opened {
            kind: BlockKind::Console,
            id: "o".to_string(),
            role: Role::Computer,
            format: None,
        };
        assert_eq!(fragment(&open_console).as_deref(), Some(CONSOLE_FENCE_OPEN));

        let close = BlockTransition::Closed {
            kind: BlockKind::Console,
            id: "o".to_string(),
        };
        assert_eq!(fragment(&close).as_deref(), Some(FENCE_CLOSE));
    }

    #[test]
    fn test_fragment_silent_transitions() {
        let open_message = BlockTransition::Opened {
            kind: BlockKind::Message,
            id: "m".to_string(),
            role: Role::Assistant,
            format: None,
        };
        assert!(fragment(&open_message).is_none());
        assert!(fragment(&BlockTransition::ActiveLine { line: Some(1) }).is_none());
        let empty = BlockTransition::Appended {
            kind: BlockKind::Message,
            id: "m".to_string(),
            text: String::new(),
            flagged: false,
        };
        assert!(fragment(&empty).is_none());
    }

    #[test]
    fn test_failure_message() {
        assert_eq!(failure_message(&RelayError::Execution("boom".to_string())), "boom");
        assert_eq!(
            failure_message(&RelayError::AgentPoisoned("a".to_string())),
            "Agent 'a' is unavailable until its history is recovered"
        );
        assert_eq!(error_suffix("boom"), "\n\nError: boom\n");
    }
}
