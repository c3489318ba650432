use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_relay::cli::{Cli, Commands};
use a3s_relay::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; logs go to stderr so they never mix with the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, mock } => {
            a3s_relay::cli::serve::execute(host.as_deref(), port, mock).await?;
        }
        Commands::Run {
            prompt,
            isolated,
            mock,
        } => {
            let config = RelayConfig::load()?;
            let agent = a3s_relay::cli::build_agent(&config, mock)?;
            a3s_relay::cli::run::execute(&config, agent, prompt.as_deref(), isolated).await?;
        }
        Commands::Config => {
            a3s_relay::cli::config::execute()?;
        }
    }

    Ok(())
}
