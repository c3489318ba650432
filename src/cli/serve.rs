use crate::config::RelayConfig;
use crate::error::Result;
use crate::server;

/// Execute the `serve` command: start the HTTP server.
pub async fn execute(host: Option<&str>, port: Option<u16>, mock: bool) -> Result<()> {
    let mut config = RelayConfig::load()?;

    // Override config with CLI arguments
    if let Some(host) = host {
        config.host = host.to_string();
    }
    if let Some(port) = port {
        config.port = port;
    }

    let agent = super::build_agent(&config, mock)?;

    println!("A3S Relay server starting...");
    println!("Listening on http://{}:{}", config.host, config.port);
    println!("Press Ctrl+C to stop");

    server::start(config, agent).await
}
