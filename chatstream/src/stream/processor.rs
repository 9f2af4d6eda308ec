// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Event stream
//
// Wraps a transport body in a lazy, finite, non-restartable stream of
// events. Each poll suspends on the next chunk read; events decoded from
// one chunk are yielded in source order before the next chunk is read.

use super::parser::StreamFrameParser;
use super::types::StreamEvent;
use crate::error::ChatError;
use crate::transport::TransportError;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ChatError>> + Send>>;

type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

struct EventStreamState {
    body: BodyStream,
    parser: StreamFrameParser,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

/// Parse a byte body into events.
///
/// A transport error mid-body is yielded once as `Err` and ends the stream.
/// A final unterminated line is classified when the body ends.
pub fn event_stream(
    body: impl Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
) -> EventStream {
    let state = EventStreamState {
        body: Box::pin(body),
        parser: StreamFrameParser::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.parser.feed_bytes(&chunk);
                    state.ready.extend(events);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "chat body failed mid-stream");
                    state.finished = true;
                    return Some((Err(ChatError::from(e)), state));
                }
                None => {
                    state.finished = true;
                    let tail = state.parser.finish();
                    if state.parser.dropped_lines() > 0 {
                        tracing::debug!(
                            dropped = state.parser.dropped_lines(),
                            "stream ended with dropped lines"
                        );
                    }
                    state.ready.extend(tail);
                }
            }
        }
    });

    Box::pin(stream)
}

/// Convenience for infallible in-memory bodies.
pub fn event_stream_from_chunks(
    chunks: impl Stream<Item = Bytes> + Send + 'static,
) -> EventStream {
    event_stream(chunks.map(Ok))
}
