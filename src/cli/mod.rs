pub mod config;
pub mod run;
pub mod serve;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::agent::{AgentHandle, FileHistoryStore, HistoryStore, ProcessAgent, ScriptedAgent};
use crate::config::RelayConfig;
use crate::error::Result;

/// A3S Relay - Stream code-execution agents as OpenAI-compatible chat and live transcripts
#[derive(Debug, Parser)]
#[command(name = "a3s-relay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host address to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Serve the scripted demo agent instead of the configured one
        #[arg(long)]
        mock: bool,
    },

    /// Chat with the agent in the terminal
    Run {
        /// Send a single instruction instead of reading from stdin
        #[arg(long)]
        prompt: Option<String>,

        /// Run every instruction against an empty history
        #[arg(long)]
        isolated: bool,

        /// Use the scripted demo agent instead of the configured one
        #[arg(long)]
        mock: bool,
    },

    /// Print the effective configuration
    Config,
}

/// Build the agent described by `config`, or the scripted demo agent.
pub fn build_agent(config: &RelayConfig, mock: bool) -> Result<AgentHandle> {
    let store: Option<Arc<dyn HistoryStore>> = config
        .history_file
        .as_ref()
        .map(|path| Arc::new(FileHistoryStore::new(path)) as Arc<dyn HistoryStore>);

    let agent_config = match (&config.agent, mock) {
        (Some(agent_config), false) => agent_config,
        (None, false) => {
            tracing::warn!("No agent command configured; using the scripted demo agent");
            return build_demo(config, store);
        }
        (_, true) => return build_demo(config, store),
    };

    let mut agent = ProcessAgent::new(agent_config.clone())
        .with_default_format(config.default_code_format.clone());
    if let Some(store) = store {
        agent = agent.with_store(store)?;
    }
    tracing::info!(agent = %agent_config.command, "Using process agent");
    Ok(AgentHandle::new(agent))
}

fn build_demo(config: &RelayConfig, store: Option<Arc<dyn HistoryStore>>) -> Result<AgentHandle> {
    let mut agent = ScriptedAgent::demo().with_default_format(config.default_code_format.clone());
    if let Some(store) = store {
        agent = agent.with_history(store.load()?).with_store(store);
    }
    Ok(AgentHandle::new(agent))
}
