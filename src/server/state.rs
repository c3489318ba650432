use std::sync::Arc;

use crate::agent::{AgentHandle, Isolator};
use crate::config::RelayConfig;

/// Shared application state accessible to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub agent: AgentHandle,
    pub isolator: Isolator,
    pub config: Arc<RelayConfig>,
    /// Unix timestamp the server started at
    pub started_at: i64,
}

impl AppState {
    pub fn new(agent: AgentHandle, config: Arc<RelayConfig>) -> Self {
        let isolator =
            Isolator::new(agent.clone()).with_default_format(config.default_code_format.clone());
        Self {
            agent,
            isolator,
            config,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
