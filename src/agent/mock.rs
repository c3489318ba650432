//! Deterministic scripted agent
//!
//! Replays queued event scripts instead of talking to a model. Used by tests
//! and by the `--mock` CLI mode.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::history::{collect_entries, HistoryEntry, HistoryStore};
use super::{Agent, EventSink};
use crate::error::{RelayError, Result};
use crate::event::Event;
use crate::tracker::DEFAULT_CODE_FORMAT;

/// One scripted response
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub events: Vec<Event>,
    /// Execution error raised after the events are emitted
    pub failure: Option<String>,
}

/// Agent that replays scripts in order
pub struct ScriptedAgent {
    name: String,
    history: Vec<HistoryEntry>,
    scripts: VecDeque<Script>,
    fallback: Option<Script>,
    event_delay: Option<Duration>,
    fail_restores: bool,
    store: Option<Arc<dyn HistoryStore>>,
    default_format: String,
    instructions: Arc<Mutex<Vec<String>>>,
    observed_history: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            history: Vec::new(),
            scripts: VecDeque::new(),
            fallback: None,
            event_delay: None,
            fail_restores: false,
            store: None,
            default_format: DEFAULT_CODE_FORMAT.to_string(),
            instructions: Arc::new(Mutex::new(Vec::new())),
            observed_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Agent that answers every instruction with a short showcase of all
    /// block kinds
    pub fn demo() -> Self {
        Self::new("mock").with_fallback(demo_script())
    }

    /// Queue a script for the next unscripted invocation
    pub fn with_script(mut self, events: Vec<Event>) -> Self {
        self.scripts.push_back(Script {
            events,
            failure: None,
        });
        self
    }

    /// Queue a script that ends with an execution error
    pub fn with_failing_script(mut self, events: Vec<Event>, failure: impl Into<String>) -> Self {
        self.scripts.push_back(Script {
            events,
            failure: Some(failure.into()),
        });
        self
    }

    /// Script replayed whenever the queue is empty
    pub fn with_fallback(mut self, script: Script) -> Self {
        self.fallback = Some(script);
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    /// Mirror history changes into a store
    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Format recorded in history for code blocks that arrive without one
    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    /// Pause between events, to imitate model latency
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Make every history restore fail, as a broken store would
    pub fn failing_restores(mut self) -> Self {
        self.fail_restores = true;
        self
    }

    /// Instructions received so far
    pub fn instructions(&self) -> Arc<Mutex<Vec<String>>> {
        self.instructions.clone()
    }

    /// History length seen at the start of each run
    pub fn observed_history_lengths(&self) -> Arc<Mutex<Vec<usize>>> {
        self.observed_history.clone()
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.history) {
                tracing::warn!(agent = %self.name, error = %e, "Failed to persist history");
            }
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    fn take_history(&mut self) -> Vec<HistoryEntry> {
        std::mem::take(&mut self.history)
    }

    fn restore_history(&mut self, history: Vec<HistoryEntry>) -> Result<()> {
        if self.fail_restores {
            return Err(RelayError::Store("history store rejected the write".to_string()));
        }
        if let Some(store) = &self.store {
            store.save(&history)?;
        }
        self.history = history;
        Ok(())
    }

    async fn run(&mut self, instruction: &str, sink: &EventSink) -> Result<()> {
        if let Ok(mut instructions) = self.instructions.lock() {
            instructions.push(instruction.to_string());
        }
        if let Ok(mut observed) = self.observed_history.lock() {
            observed.push(self.history.len());
        }
        self.history.push(HistoryEntry::user(instruction));

        let script = self
            .scripts
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Script {
                events: vec![Event::message(format!("Nothing scripted for: {instruction}"))],
                failure: None,
            });

        let mut emitted = Vec::with_capacity(script.events.len());
        let mut delivery = Ok(());
        for event in script.events {
            if let Some(delay) = self.event_delay {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = sink.emit(event.clone()).await {
                delivery = Err(e);
                break;
            }
            emitted.push(event);
        }

        self.history
            .extend(collect_entries(emitted, &self.default_format));
        self.persist();
        delivery?;

        match script.failure {
            Some(message) => Err(RelayError::Execution(message)),
            None => Ok(()),
        }
    }
}

fn demo_script() -> Script {
    let mut events = vec![
        Event::message("Sure. I'll count the files in the current directory.\n\n"),
        Event::message("Here is the plan:\n\n1. list the entries\n2. **count** them\n"),
        Event::code_start("python"),
        Event::code("import os\n"),
        Event::code("entries = os.listdir('.')\n"),
        Event::code("print(len(entries))"),
        Event::code_end(),
        Event::console_start(),
    ];
    for line in 1..=3 {
        events.push(Event::active_line(Some(line)));
    }
    events.extend([
        Event::console("12\n"),
        Event::active_line(None),
        Event::console_end(),
        Event::message("There are `12` entries in the current directory."),
    ]);
    Script {
        events,
        failure: None,
    }
}
