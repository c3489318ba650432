use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};

/// The standard SSE termination marker used by OpenAI-compatible APIs.
pub const SSE_DONE: &str = "[DONE]";

/// Create an SSE response from a stream of JSON-serializable values.
///
/// Each item is serialized to JSON and sent as an SSE `data` event. A final
/// `[DONE]` event is sent when the stream ends. Items that fail to serialize
/// are logged and skipped.
pub fn sse_response<S, T>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = T> + Send + 'static,
    T: serde::Serialize + Send + 'static,
{
    let data = stream
        .filter_map(|item| async move { format_sse_data(&item) })
        .chain(futures::stream::once(async { SSE_DONE.to_string() }));

    Sse::new(data.map(|data| Ok(Event::default().data(data)))).keep_alive(KeepAlive::default())
}

/// Format a single SSE data line from a serializable value.
pub fn format_sse_data<T: serde::Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!(error = %e, "Dropping unserializable SSE item");
            None
        }
    }
}
