use std::io::Write;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::AgentHandle;
use crate::config::RelayConfig;
use crate::encoder::failure_message;
use crate::error::Result;
use crate::tracker::BlockTracker;
use crate::transcript::{Highlighter, TerminalSurface, TranscriptRenderer};

/// Execute the `run` command: chat with the agent in the terminal.
pub async fn execute(
    config: &RelayConfig,
    agent: AgentHandle,
    prompt: Option<&str>,
    isolated: bool,
) -> Result<()> {
    let mut session = Session {
        agent,
        default_format: config.default_code_format.clone(),
        redraw_interval: config.redraw_interval().max(Duration::from_millis(1)),
        isolated,
        renderer: TranscriptRenderer::new(),
        surface: TerminalSurface::new(
            std::io::stdout(),
            Highlighter::new(&config.highlight_theme),
            config.redraw_interval(),
        ),
    };

    if let Some(prompt_text) = prompt {
        return session.turn(prompt_text).await;
    }

    println!("Interactive mode (type 'exit' or Ctrl+C to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("» ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let instruction = line.trim();
        if instruction.is_empty() {
            continue;
        }
        if matches!(instruction, "exit" | "quit") {
            break;
        }

        // Replace the typed line with the rendered user node.
        print!("\x1b[1A\x1b[2K");
        session.turn(instruction).await?;
    }

    Ok(())
}

struct Session {
    agent: AgentHandle,
    default_format: String,
    redraw_interval: Duration,
    isolated: bool,
    renderer: TranscriptRenderer,
    surface: TerminalSurface<std::io::Stdout>,
}

impl Session {
    /// Send one instruction and render the response as it streams.
    async fn turn(&mut self, instruction: &str) -> Result<()> {
        self.renderer.user_message(instruction);
        self.surface.apply(self.renderer.updates())?;

        let mut events = if self.isolated {
            self.agent.invoke_isolated(instruction).await?
        } else {
            self.agent.invoke(instruction).await?
        };

        let mut tracker = BlockTracker::new(self.default_format.clone());
        let mut tick = tokio::time::interval(self.redraw_interval);
        let mut failure = None;

        loop {
            tokio::select! {
                item = events.next() => match item {
                    Some(Ok(event)) => {
                        for transition in tracker.advance(event) {
                            self.renderer.apply(&transition);
                        }
                        self.surface.apply(self.renderer.updates())?;
                    }
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    None => break,
                },
                _ = tick.tick() => self.surface.flush()?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted; cancelling the agent");
                    break;
                }
            }
        }
        drop(events);

        for transition in tracker.finish() {
            self.renderer.apply(&transition);
        }
        self.renderer.finish();
        self.surface.apply(self.renderer.updates())?;
        self.surface.finish()?;

        match failure {
            Some(e) if e.is_fatal() => Err(e),
            Some(e) => {
                eprintln!("\x1b[31mError: {}\x1b[0m", failure_message(&e));
                Ok(())
            }
            None => Ok(()),
        }
    }
}
