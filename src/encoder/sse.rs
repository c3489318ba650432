//! Streaming (SSE) encoder
//!
//! Produces OpenAI-style chat-completion delta frames from block transitions.
//! Each transition maps to at most one frame; nothing is buffered.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{error_suffix, failure_message, fragment, FinishReason};
use crate::error::Result;
use crate::event::Event;
use crate::tracker::{BlockTracker, BlockTransition};

/// Incremental message content of a frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One server-sent chat-completion frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

/// Frame factory for one response
#[derive(Debug, Clone)]
pub struct SseEncoder {
    id: String,
    created: i64,
    model: String,
}

impl SseEncoder {
    /// Create an encoder for a new response with a fresh id
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_id(
            format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            chrono::Utc::now().timestamp(),
            model,
        )
    }

    pub fn with_id(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn frame(&self, delta: Delta, finish_reason: Option<FinishReason>) -> SseFrame {
        SseFrame {
            id: self.id.clone(),
            created: self.created,
            model: self.model.clone(),
            delta,
            finish_reason,
        }
    }

    fn content_frame(&self, content: String) -> SseFrame {
        self.frame(
            Delta {
                role: None,
                content: Some(content),
            },
            None,
        )
    }

    /// The role-only frame every response starts with
    pub fn start(&self) -> SseFrame {
        self.frame(
            Delta {
                role: Some("assistant".to_string()),
                content: None,
            },
            None,
        )
    }

    /// Frame for a transition, if it carries any text
    pub fn encode(&self, transition: &BlockTransition) -> Option<SseFrame> {
        fragment(transition).map(|content| self.content_frame(content))
    }

    /// Closing frames: an error trailer when the agent failed, then the
    /// terminal frame carrying the finish reason
    pub fn finish(&self, error: Option<&str>) -> Vec<SseFrame> {
        match error {
            Some(message) => vec![
                self.content_frame(error_suffix(message)),
                self.frame(Delta::default(), Some(FinishReason::Error)),
            ],
            None => vec![self.frame(Delta::default(), Some(FinishReason::Stop))],
        }
    }
}

/// Transcode an agent event stream into SSE frames as events arrive.
///
/// The first item is always the role frame and the last is always a terminal
/// frame, whether the stream ends normally or with an error item.
pub fn stream_frames<S>(
    events: S,
    encoder: SseEncoder,
    mut tracker: BlockTracker,
) -> impl Stream<Item = SseFrame> + Send
where
    S: Stream<Item = Result<Event>> + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(events);
        yield encoder.start();

        let mut failure = None;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    for transition in tracker.advance(event) {
                        if let Some(frame) = encoder.encode(&transition) {
                            yield frame;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(response = %encoder.id(), error = %e, "Agent stream failed");
                    failure = Some(failure_message(&e));
                    break;
                }
            }
        }

        for transition in tracker.finish() {
            if let Some(frame) = encoder.encode(&transition) {
                yield frame;
            }
        }
        for frame in encoder.finish(failure.as_deref()) {
            yield frame;
        }
    }
}

/// Encode a complete event sequence into frames
pub fn encode_all(
    events: impl IntoIterator<Item = Event>,
    encoder: &SseEncoder,
    default_format: &str,
    error: Option<&str>,
) -> Vec<SseFrame> {
    let mut frames = vec![encoder.start()];
    frames.extend(
        crate::tracker::track_all(events, default_format)
            .iter()
            .filter_map(|t| encoder.encode(t)),
    );
    frames.extend(encoder.finish(error));
    frames
}
