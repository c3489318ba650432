//! HTTP API surface
//!
//! `openai` serves the OpenAI-compatible endpoints under `/v1`; `health`
//! reports whether the agent is in service.

pub mod openai;
pub mod sse;
pub mod types;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::server::state::AppState;

/// GET /health - liveness plus agent availability.
///
/// Answers 503 once the agent has been poisoned by a failed history restore.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let poisoned = state.agent.is_poisoned();
    let status = if poisoned {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(serde_json::json!({
            "status": if poisoned { "unavailable" } else { "ok" },
            "agent": state.agent.name(),
            "isolate_requests": state.config.isolate_requests,
        })),
    )
}
