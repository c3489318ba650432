use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::types::{ModelInfo, ModelList};
use crate::server::state::AppState;

/// GET /v1/models - the relay advertises one model: its agent.
pub async fn handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ModelList {
        object: "list".to_string(),
        data: vec![ModelInfo {
            id: state.config.model.clone(),
            object: "model".to_string(),
            created: state.started_at,
            owned_by: state.agent.name().to_string(),
        }],
    })
}
