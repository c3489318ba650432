//! Aggregate (non-streaming) encoder
//!
//! Collapses a response into one string using the same fragment mapping as
//! the SSE encoder.

use futures::{Stream, StreamExt};

use super::{error_suffix, failure_message, fragment, FinishReason};
use crate::error::Result;
use crate::event::Event;
use crate::tracker::{BlockTracker, BlockTransition};

/// Final non-streaming output of one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub content: String,
    pub finish_reason: FinishReason,
}

/// Accumulates transition fragments into a single string
#[derive(Debug, Default)]
pub struct AggregateEncoder {
    content: String,
}

impl AggregateEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transition: &BlockTransition) {
        if let Some(text) = fragment(transition) {
            self.content.push_str(&text);
        }
    }

    /// Content accumulated so far
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn finish(mut self, error: Option<&str>) -> Aggregate {
        let finish_reason = match error {
            Some(message) => {
                self.content.push_str(&error_suffix(message));
                FinishReason::Error
            }
            None => FinishReason::Stop,
        };
        Aggregate {
            content: self.content,
            finish_reason,
        }
    }
}

/// Drain an agent event stream into an aggregate response
pub async fn collect<S>(events: S, mut tracker: BlockTracker) -> Aggregate
where
    S: Stream<Item = Result<Event>>,
{
    let mut events = Box::pin(events);
    let mut encoder = AggregateEncoder::new();
    let mut failure = None;

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                for transition in tracker.advance(event) {
                    encoder.push(&transition);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Agent stream failed");
                failure = Some(failure_message(&e));
                break;
            }
        }
    }

    for transition in tracker.finish() {
        encoder.push(&transition);
    }
    encoder.finish(failure.as_deref())
}

/// Aggregate a complete event sequence
pub fn aggregate_all(
    events: impl IntoIterator<Item = Event>,
    default_format: &str,
    error: Option<&str>,
) -> Aggregate {
    let mut encoder = AggregateEncoder::new();
    for transition in crate::tracker::track_all(events, default_format) {
        encoder.push(&transition);
    }
    encoder.finish(error)
}
