use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;

use crate::agent::EventStream;
use crate::api::sse::sse_response;
use crate::api::types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::encoder::aggregate::{aggregate_all, collect, Aggregate};
use crate::encoder::failure_message;
use crate::encoder::sse::{stream_frames, SseEncoder};
use crate::error::{RelayError, Result};
use crate::server::state::AppState;
use crate::tracker::BlockTracker;

/// POST /v1/chat/completions - OpenAI-compatible chat completion.
///
/// The last user message is handed to the agent as its instruction. Supports
/// both streaming and non-streaming modes; both are produced by the same
/// transcoder, so they carry the same text.
pub async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let Some(instruction) = request.instruction() else {
        return RelayError::InvalidRequest("messages must contain a user message".to_string())
            .into();
    };

    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.model.clone());
    let encoder = SseEncoder::new(model);
    let tracker = BlockTracker::new(state.config.default_code_format.clone())
        .with_id_prefix(encoder.id());
    let isolated = state.config.isolate_requests;

    tracing::debug!(
        response = %encoder.id(),
        stream = request.stream.unwrap_or(false),
        isolated,
        "Chat completion request"
    );

    if request.stream.unwrap_or(false) {
        let events = match invoke(&state, instruction, isolated).await {
            Ok(events) => events,
            Err(e) => return e.into(),
        };
        let frames = stream_frames(events, encoder, tracker).map(ChatCompletionChunk::from);
        return sse_response(frames).into_response();
    }

    let aggregate = if isolated {
        match isolate(&state, instruction).await {
            Ok(aggregate) => aggregate,
            Err(e) => return e.into(),
        }
    } else {
        match state.agent.invoke(instruction).await {
            Ok(events) => collect(events, tracker).await,
            Err(e) => return e.into(),
        }
    };

    Json(ChatCompletionResponse::from_aggregate(
        encoder.id().to_string(),
        encoder.created(),
        encoder.model().to_string(),
        aggregate,
    ))
    .into_response()
}

async fn invoke(state: &AppState, instruction: String, isolated: bool) -> Result<EventStream> {
    if isolated {
        state.agent.invoke_isolated(instruction).await
    } else {
        state.agent.invoke(instruction).await
    }
}

/// Run through the isolator; fatal history errors fail the request.
async fn isolate(state: &AppState, instruction: String) -> Result<Aggregate> {
    let isolated = state.isolator.isolate(instruction).await?;
    let failure = isolated.error.as_ref().map(failure_message);
    Ok(aggregate_all(
        isolated.events,
        &state.config.default_code_format,
        failure.as_deref(),
    ))
}
