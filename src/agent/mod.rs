//! Agent boundary
//!
//! An `Agent` turns an instruction into a stream of events and owns the
//! conversation history those instructions build up. Agents are stateful and
//! not reentrant, so every agent lives behind an `AgentHandle` that grants
//! exclusive access for the full duration of one invocation.
//!
//! Events travel from the agent's task to the consumer over a bounded
//! channel. Dropping the consumer side cancels the invocation: the sink's
//! `emit` starts failing and the cancellation token fires.

pub mod history;
pub mod isolate;
pub mod mock;
pub mod process;

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{FutureExt, Stream};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

use crate::error::{RelayError, Result};
use crate::event::Event;

pub use history::{FileHistoryStore, HistoryEntry, HistoryStore, MemoryHistoryStore};
pub use isolate::{Isolated, Isolator};
pub use mock::ScriptedAgent;
pub use process::{ProcessAgent, ProcessAgentConfig};

/// Capacity of the channel between an agent and its consumer
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A code-execution agent
#[async_trait]
pub trait Agent: Send {
    /// Human-readable name of this agent
    fn name(&self) -> &str;

    /// Current conversation history
    fn history(&self) -> &[HistoryEntry];

    /// Remove and return the conversation history, leaving it empty
    fn take_history(&mut self) -> Vec<HistoryEntry>;

    /// Replace the conversation history
    fn restore_history(&mut self, history: Vec<HistoryEntry>) -> Result<()>;

    /// Execute an instruction, emitting events through `sink`.
    ///
    /// Returning an error ends the invocation with an execution failure.
    async fn run(&mut self, instruction: &str, sink: &EventSink) -> Result<()>;
}

/// Sending half of an invocation's event channel
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Result<Event>>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Deliver an event to the consumer. Fails with `Cancelled` once the
    /// consumer is gone.
    pub async fn emit(&self, event: Event) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        tokio::select! {
            sent = self.tx.send(Ok(event)) => sent.map_err(|_| RelayError::Cancelled),
            _ = self.cancel.cancelled() => Err(RelayError::Cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the consumer goes away
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    async fn fail(&self, err: RelayError) {
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Receiving half of an invocation. Yields events and, on failure, one final
/// error item. Dropping it cancels the invocation.
pub struct EventStream {
    rx: ReceiverStream<Result<Event>>,
    _cancel_on_drop: DropGuard,
}

impl EventStream {
    fn channel() -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let sink = EventSink {
            tx,
            cancel: cancel.clone(),
        };
        let stream = EventStream {
            rx: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        };
        (sink, stream)
    }

    /// A stream over already-produced items; used by tests and replays
    pub fn from_items(items: Vec<Result<Event>>) -> EventStream {
        let (sink, stream) = Self::channel();
        tokio::spawn(async move {
            for item in items {
                if sink.tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        stream
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().rx).poll_next(cx)
    }
}

/// How an invocation treats the agent's existing history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Run on top of the shared conversation
    Shared,
    /// Run against an empty history and restore the original afterwards
    Isolated,
}

/// Exclusive-access wrapper around a shared agent instance
#[derive(Clone)]
pub struct AgentHandle {
    agent: Arc<Mutex<Box<dyn Agent>>>,
    poisoned: Arc<AtomicBool>,
    stranded: Arc<std::sync::Mutex<Option<Vec<HistoryEntry>>>>,
    name: Arc<str>,
}

impl AgentHandle {
    pub fn new(agent: impl Agent + 'static) -> Self {
        let name: Arc<str> = Arc::from(agent.name());
        Self {
            agent: Arc::new(Mutex::new(Box::new(agent))),
            poisoned: Arc::new(AtomicBool::new(false)),
            stranded: Arc::new(std::sync::Mutex::new(None)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a failed history restore has taken this agent out of service
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Snapshot of the agent's history, taken once no invocation is running
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.agent.lock().await.history().to_vec()
    }

    /// Run an instruction on the shared conversation
    pub async fn invoke(&self, instruction: impl Into<String>) -> Result<EventStream> {
        self.start(instruction.into(), InvocationMode::Shared)
    }

    /// Run an instruction against a private, empty history
    pub async fn invoke_isolated(&self, instruction: impl Into<String>) -> Result<EventStream> {
        self.start(instruction.into(), InvocationMode::Isolated)
    }

    /// History that could not be written back by a failed isolation restore
    pub fn stranded_history(&self) -> Option<Vec<HistoryEntry>> {
        self.stranded.lock().ok().and_then(|stranded| stranded.clone())
    }

    /// Replace the history of a poisoned agent and put it back in service
    pub async fn recover(&self, history: Vec<HistoryEntry>) -> Result<()> {
        let mut agent = self.agent.lock().await;
        agent.restore_history(history)?;
        if let Ok(mut stranded) = self.stranded.lock() {
            *stranded = None;
        }
        self.poisoned.store(false, Ordering::SeqCst);
        tracing::info!(agent = %self.name, "Agent history recovered");
        Ok(())
    }

    pub(crate) async fn lock(&self) -> Result<OwnedMutexGuard<Box<dyn Agent>>> {
        let guard = self.agent.clone().lock_owned().await;
        self.ensure_healthy()?;
        Ok(guard)
    }

    /// Take the agent out of service, keeping the history it failed to restore
    pub(crate) fn poison(&self, stranded: Vec<HistoryEntry>) {
        if let Ok(mut slot) = self.stranded.lock() {
            *slot = Some(stranded);
        }
        self.poisoned.store(true, Ordering::SeqCst);
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(RelayError::AgentPoisoned(self.name.to_string()));
        }
        Ok(())
    }

    fn start(&self, instruction: String, mode: InvocationMode) -> Result<EventStream> {
        self.ensure_healthy()?;

        let (sink, stream) = EventStream::channel();
        let handle = self.clone();
        tokio::spawn(async move {
            let mut agent = match handle.lock().await {
                Ok(agent) => agent,
                Err(e) => {
                    sink.fail(e).await;
                    return;
                }
            };

            if sink.is_cancelled() {
                tracing::debug!(agent = %handle.name, "Consumer left before the agent was free; skipping run");
                return;
            }

            tracing::info!(agent = %handle.name, ?mode, "Agent invocation started");
            let result = match mode {
                InvocationMode::Shared => run_guarded(&mut **agent, &instruction, &sink).await,
                InvocationMode::Isolated => {
                    isolate::run_isolated(&handle, &mut **agent, &instruction, &sink).await
                }
            };
            drop(agent);

            match result {
                Ok(()) => tracing::info!(agent = %handle.name, "Agent invocation finished"),
                Err(RelayError::Cancelled) => {
                    tracing::warn!(agent = %handle.name, "Agent invocation cancelled by consumer")
                }
                Err(e) => {
                    tracing::warn!(agent = %handle.name, error = %e, "Agent invocation failed");
                    sink.fail(e).await;
                }
            }
        });

        Ok(stream)
    }
}

/// Run the agent, turning a panic into an execution error so the consumer
/// always sees how the invocation ended.
pub(crate) async fn run_guarded(
    agent: &mut dyn Agent,
    instruction: &str,
    sink: &EventSink,
) -> Result<()> {
    match AssertUnwindSafe(agent.run(instruction, sink))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(RelayError::Execution("agent panicked".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_invoke_streams_events_in_order() {
        let agent = ScriptedAgent::new("mock").with_script(vec![
            Event::message("one"),
            Event::message("two"),
        ]);
        let handle = AgentHandle::new(agent);

        let items: Vec<_> = handle.invoke("go").await.unwrap().collect().await;
        let contents: Vec<String> = items.into_iter().map(|i| i.unwrap().content).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_invoke_surfaces_execution_error_last() {
        let agent = ScriptedAgent::new("mock").with_failing_script(
            vec![Event::console_start(), Event::console("partial")],
            "exit status 1",
        );
        let handle = AgentHandle::new(agent);

        let items: Vec<_> = handle.invoke("go").await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(&items[2], Err(RelayError::Execution(m)) if m == "exit status 1"));
    }

    #[tokio::test]
    async fn test_invocations_are_serialized() {
        let agent = ScriptedAgent::new("mock")
            .with_script(vec![Event::message("first")])
            .with_script(vec![Event::message("second")]);
        let handle = AgentHandle::new(agent);

        let a = handle.invoke("a").await.unwrap();
        let b = handle.invoke("b").await.unwrap();
        let (a, b) = tokio::join!(a.collect::<Vec<_>>(), b.collect::<Vec<_>>());
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);

        let history = handle.history().await;
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_run() {
        let agent = ScriptedAgent::new("mock").with_script(
            (0..1000).map(|i| Event::message(format!("{i} "))).collect(),
        );
        let handle = AgentHandle::new(agent);

        let mut stream = handle.invoke("go").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "0 ");
        drop(stream);

        // The agent must become available again once the cancelled run unwinds.
        let history = tokio::time::timeout(std::time::Duration::from_secs(5), handle.history())
            .await
            .unwrap();
        assert_eq!(history[0], HistoryEntry::user("go"));
    }

    #[tokio::test]
    async fn test_dropped_queued_stream_never_runs() {
        let agent = ScriptedAgent::new("mock")
            .with_event_delay(std::time::Duration::from_millis(20))
            .with_script(vec![Event::message("a1"), Event::message("a2")])
            .with_script(vec![Event::message("b")]);
        let instructions = agent.instructions();
        let handle = AgentHandle::new(agent);

        let first = handle.invoke("a").await.unwrap();
        let queued = handle.invoke("b").await.unwrap();
        // Let the second invocation's task start waiting on the agent lock.
        tokio::task::yield_now().await;
        drop(queued);

        let items: Vec<_> = first.collect().await;
        assert_eq!(items.len(), 2);

        let history = handle.history().await;
        assert_eq!(instructions.lock().unwrap().as_slice(), &["a"]);
        assert!(!history.contains(&HistoryEntry::user("b")));
    }

    struct PanickingAgent {
        history: Vec<HistoryEntry>,
    }

    #[async_trait]
    impl Agent for PanickingAgent {
        fn name(&self) -> &str {
            "panicky"
        }

        fn history(&self) -> &[HistoryEntry] {
            &self.history
        }

        fn take_history(&mut self) -> Vec<HistoryEntry> {
            std::mem::take(&mut self.history)
        }

        fn restore_history(&mut self, history: Vec<HistoryEntry>) -> Result<()> {
            self.history = history;
            Ok(())
        }

        async fn run(&mut self, _instruction: &str, sink: &EventSink) -> Result<()> {
            sink.emit(Event::message("partial")).await?;
            panic!("agent bug");
        }
    }

    #[tokio::test]
    async fn test_agent_panic_surfaces_as_execution_error() {
        let handle = AgentHandle::new(PanickingAgent {
            history: Vec::new(),
        });

        let items: Vec<_> = handle.invoke("go").await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content, "partial");
        assert!(matches!(&items[1], Err(RelayError::Execution(m)) if m == "agent panicked"));

        // The handle stays usable after the panic.
        assert!(handle.invoke("again").await.is_ok());
    }

    #[tokio::test]
    async fn test_poisoned_handle_rejects_invocations() {
        let handle = AgentHandle::new(ScriptedAgent::new("mock"));
        handle.poison(vec![HistoryEntry::user("lost")]);
        assert_eq!(
            handle.stranded_history(),
            Some(vec![HistoryEntry::user("lost")])
        );
        assert!(matches!(
            handle.invoke("x").await,
            Err(RelayError::AgentPoisoned(_))
        ));

        handle.recover(Vec::new()).await.unwrap();
        assert!(!handle.is_poisoned());
        assert!(handle.stranded_history().is_none());
        assert!(handle.invoke("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_event_stream_from_items() {
        let stream = EventStream::from_items(vec![
            Ok(Event::message("a")),
            Err(RelayError::Execution("b".to_string())),
        ]);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
    }
}
