//! Agent backed by an external command
//!
//! Each instruction spawns the configured command. The relay writes a single
//! JSON request line (`{"instruction": ..., "history": [...]}`) to its stdin
//! and reads JSON-lines `Event`s from its stdout until EOF. A non-zero exit
//! status is an execution error. Lines that are not valid events are passed
//! through as `unknown` events so no output is lost.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::history::{collect_entries, HistoryEntry, HistoryStore};
use super::{Agent, EventSink};
use crate::error::{RelayError, Result};
use crate::event::{Event, Role};
use crate::tracker::DEFAULT_CODE_FORMAT;

/// Maximum number of stderr bytes quoted in an execution error
const STDERR_TAIL_BYTES: usize = 2048;

/// How to launch a process agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAgentConfig {
    /// Executable to run
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Display name; defaults to the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ProcessAgentConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            name: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    instruction: &'a str,
    history: &'a [HistoryEntry],
}

/// Agent that delegates every instruction to a child process
pub struct ProcessAgent {
    name: String,
    config: ProcessAgentConfig,
    history: Vec<HistoryEntry>,
    store: Option<Arc<dyn HistoryStore>>,
    default_format: String,
}

impl ProcessAgent {
    pub fn new(config: ProcessAgentConfig) -> Self {
        let name = config.name.clone().unwrap_or_else(|| config.command.clone());
        Self {
            name,
            config,
            history: Vec::new(),
            store: None,
            default_format: DEFAULT_CODE_FORMAT.to_string(),
        }
    }

    /// Load history from `store` and mirror every change back into it
    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Result<Self> {
        self.history = store.load()?;
        self.store = Some(store);
        Ok(self)
    }

    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.history) {
                tracing::warn!(agent = %self.name, error = %e, "Failed to persist history");
            }
        }
    }

    async fn execute(&self, instruction: &str, sink: &EventSink, emitted: &mut Vec<Event>) -> Result<()> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RelayError::Execution(format!(
                "Failed to spawn agent command '{}': {}",
                self.config.command, e
            ))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::Execution("agent process has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::Execution("agent process has no stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RelayError::Execution("agent process has no stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let request = serde_json::to_string(&ProcessRequest {
            instruction,
            history: &self.history,
        })? + "\n";
        stdin.write_all(request.as_bytes()).await?;
        stdin.flush().await?;
        drop(stdin);

        // Raw lines: output that is not valid UTF-8 is still passed through.
        let mut stdout = BufReader::new(stdout);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            let read = tokio::select! {
                read = stdout.read_until(b'\n', &mut raw) => read?,
                _ = sink.cancelled() => {
                    tracing::debug!(agent = %self.name, "Killing agent process after cancellation");
                    let _ = child.kill().await;
                    return Err(RelayError::Cancelled);
                }
            };
            if read == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&raw);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event = match serde_json::from_str::<Event>(trimmed) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(agent = %self.name, error = %e, "Passing through unparseable agent output");
                    Event::unknown(format!("{trimmed}\n")).with_role(Role::Computer)
                }
            };
            sink.emit(event.clone()).await?;
            emitted.push(event);
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let tail = stderr_tail(&stderr_output);
            return Err(RelayError::Execution(if tail.is_empty() {
                format!("agent process exited with {status}")
            } else {
                format!("agent process exited with {status}: {tail}")
            }));
        }

        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[async_trait]
impl Agent for ProcessAgent {
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
        if let Some(store) = &self.store {
            store.save(&history)?;
        }
        self.history = history;
        Ok(())
    }

    async fn run(&mut self, instruction: &str, sink: &EventSink) -> Result<()> {
        let mut emitted = Vec::new();
        let result = self.execute(instruction, sink, &mut emitted).await;

        self.history.push(HistoryEntry::user(instruction));
        self.history
            .extend(collect_entries(emitted, &self.default_format));
        self.persist();

        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::agent::{AgentHandle, MemoryHistoryStore};
    use crate::event::EventKind;
    use futures::StreamExt;

    fn shell(script: &str) -> ProcessAgentConfig {
        ProcessAgentConfig::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_process_agent_streams_json_lines() {
        let script = r#"read request
echo '{"kind":"message","content":"hi "}'
echo '{"kind":"code","phase":"start","format":"sh"}'
echo '{"kind":"code","content":"ls"}'
echo '{"kind":"code","phase":"end"}'"#;
        let handle = AgentHandle::new(ProcessAgent::new(shell(script)));

        let items: Vec<_> = handle.invoke("list").await.unwrap().collect().await;
        let events: Vec<Event> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], Event::code_start("sh"));

        let history = handle.history().await;
        assert_eq!(history[0], HistoryEntry::user("list"));
        assert_eq!(history[1], HistoryEntry::assistant("hi "));
        assert_eq!(history[2].kind, EventKind::Code);
    }

    #[tokio::test]
    async fn test_process_agent_receives_instruction_and_history() {
        // Echo the request back as message content.
        let script = r#"read request
printf '{"kind":"message","content":%s}\n' "$(printf '%s' "$request" | sed 's/\\/\\\\/g; s/"/\\"/g; s/^/"/; s/$/"/')""#;
        let agent = ProcessAgent::new(shell(script));
        let handle = AgentHandle::new(agent);

        let items: Vec<_> = handle.invoke("ping").await.unwrap().collect().await;
        let echoed = items[0].as_ref().unwrap().content.clone();
        let request: serde_json::Value = serde_json::from_str(&echoed).unwrap();
        assert_eq!(request["instruction"], "ping");
        assert_eq!(request["history"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_process_agent_passes_through_garbage() {
        let handle = AgentHandle::new(ProcessAgent::new(shell("read request; echo 'plain text'")));
        let items: Vec<_> = handle.invoke("x").await.unwrap().collect().await;
        let event = items[0].as_ref().unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
        assert_eq!(event.content, "plain text\n");
    }

    #[tokio::test]
    async fn test_process_agent_keeps_output_after_invalid_utf8() {
        let script = r#"read request
printf 'caf\351\n'
echo '{"kind":"message","content":"after"}'"#;
        let handle = AgentHandle::new(ProcessAgent::new(shell(script)));
        let items: Vec<_> = handle.invoke("x").await.unwrap().collect().await;

        assert_eq!(items.len(), 2);
        let garbled = items[0].as_ref().unwrap();
        assert_eq!(garbled.kind, EventKind::Unknown);
        assert_eq!(garbled.content, "caf\u{FFFD}\n");
        assert_eq!(items[1].as_ref().unwrap(), &Event::message("after"));
    }

    #[tokio::test]
    async fn test_process_agent_nonzero_exit_is_execution_error() {
        let script = r#"read request
echo '{"kind":"message","content":"partial"}'
echo 'Traceback: boom' >&2
exit 3"#;
        let handle = AgentHandle::new(ProcessAgent::new(shell(script)));
        let items: Vec<_> = handle.invoke("x").await.unwrap().collect().await;

        assert_eq!(items.len(), 2);
        match &items[1] {
            Err(RelayError::Execution(message)) => assert!(message.contains("Traceback: boom")),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_agent_spawn_failure() {
        let handle = AgentHandle::new(ProcessAgent::new(ProcessAgentConfig::new(
            "/nonexistent/a3s-relay-agent",
        )));
        let items: Vec<_> = handle.invoke("x").await.unwrap().collect().await;
        assert!(matches!(&items[0], Err(RelayError::Execution(_))));
    }

    #[test]
    fn test_with_store_loads_history() {
        let store = Arc::new(MemoryHistoryStore::default());
        store.save(&[HistoryEntry::user("earlier")]).unwrap();
        let agent = ProcessAgent::new(ProcessAgentConfig::new("true"))
            .with_store(store)
            .unwrap();
        assert_eq!(agent.history(), &[HistoryEntry::user("earlier")]);
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = "x".repeat(STDERR_TAIL_BYTES + 10);
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL_BYTES);
        assert_eq!(stderr_tail("  short \n"), "short");
    }
}
