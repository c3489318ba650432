//! Execution context isolation
//!
//! Runs one instruction against an empty conversation history and puts the
//! caller's history back afterwards, on every exit path. The agent lock is
//! held for the whole swap, so isolated runs never interleave with other
//! invocations of the same agent.
//!
//! A failed restore is fatal: the agent is poisoned and the history it could
//! not take back is kept on the handle for manual recovery.

use futures::StreamExt;

use super::{run_guarded, Agent, AgentHandle, EventSink};
use crate::error::{RelayError, Result};
use crate::event::Event;
use crate::tracker::{BlockKind, BlockTracker, DEFAULT_CODE_FORMAT};

/// Swap the history out, run, and swap it back in.
pub(crate) async fn run_isolated(
    handle: &AgentHandle,
    agent: &mut dyn Agent,
    instruction: &str,
    sink: &EventSink,
) -> Result<()> {
    let snapshot = agent.take_history();
    tracing::debug!(agent = %handle.name(), entries = snapshot.len(), "Isolating invocation");

    let outcome = run_guarded(agent, instruction, sink).await;

    if let Err(e) = agent.restore_history(snapshot.clone()) {
        tracing::error!(
            agent = %handle.name(),
            error = %e,
            "Failed to restore conversation history after isolated run"
        );
        handle.poison(snapshot);
        return Err(RelayError::HistoryCorrupted {
            agent: handle.name().to_string(),
            reason: e.to_string(),
        });
    }

    outcome
}

/// Result of one isolated invocation
#[derive(Debug)]
pub struct Isolated {
    /// Every event the agent emitted, followed by synthesized `end` events for
    /// blocks the agent left open
    pub events: Vec<Event>,
    /// Execution error raised by the agent, if any
    pub error: Option<RelayError>,
}

impl Isolated {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs instructions against a private history of a shared agent
#[derive(Clone)]
pub struct Isolator {
    handle: AgentHandle,
    default_format: String,
}

impl Isolator {
    pub fn new(handle: AgentHandle) -> Self {
        Self {
            handle,
            default_format: DEFAULT_CODE_FORMAT.to_string(),
        }
    }

    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    /// Run `instruction` in isolation and collect its events.
    ///
    /// Execution errors are reported inside `Isolated`; only fatal history
    /// errors are returned as `Err`.
    pub async fn isolate(&self, instruction: impl Into<String>) -> Result<Isolated> {
        let mut stream = self.handle.invoke_isolated(instruction).await?;
        let mut tracker = BlockTracker::new(self.default_format.clone());
        let mut events = Vec::new();
        let mut error = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    tracker.advance(event.clone());
                    events.push(event);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        match tracker.open_block().map(|(kind, _)| kind) {
            Some(BlockKind::Code) => events.push(Event::code_end()),
            Some(BlockKind::Console) => events.push(Event::console_end()),
            _ => {}
        }

        Ok(Isolated { events, error })
    }
}
