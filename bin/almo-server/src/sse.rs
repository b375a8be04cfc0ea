//! Server-Sent Events rendering of driver output.

use std::convert::Infallible;
use std::time::Duration;

use almo_core::StreamFrame;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::error;

/// End-of-stream sentinel sent after the last fragment.
pub const DONE: &str = "[DONE]";

pub fn completion_stream(
    rx: mpsc::UnboundedReceiver<StreamFrame>,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(rx).map(|frame| Ok(frame_event(frame)));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive))
}

fn frame_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Fragment(response) => Event::default().json_data(&response).unwrap_or_else(|e| {
            error!(error = %e, "failed to encode completion fragment");
            error_event("failed to encode completion fragment")
        }),
        StreamFrame::Done => Event::default().data(DONE),
        StreamFrame::Error { message } => error_event(&message),
    }
}

fn error_event(message: &str) -> Event {
    Event::default().data(
        json!({
            "error": {
                "message": message,
                "type": "generation_error",
            }
        })
        .to_string(),
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────────
