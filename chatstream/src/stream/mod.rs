// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Chat stream framing
//
// Responsibilities:
// - Decode the chunked chat transfer incrementally (UTF-8 split safe)
// - Split into lines, holding back the trailing incomplete fragment
// - Classify `data: ` JSON records into typed events
// - Track TOOL_USE / TOOL_ERROR marker spans and parse their payloads
// - Pull marker spans out of text lines where they arrived merged
// - Collapse legacy `<artifact>` spans in display text
// - Never fail: malformed lines are logged and dropped

mod classifier;
mod parser;
mod processor;
mod types;

pub use classifier::{
    classify_event_payload, collapse_artifact_spans, extract_inline_markers, strip_tool_spans,
    InlineExtraction,
};
pub use parser::StreamFrameParser;
pub use processor::{event_stream, event_stream_from_chunks, EventStream};
pub use types::{
    ControlKind, Marker, ParseError, SpanKind, StreamEvent, ARTIFACT_PLACEHOLDER, DATA_PREFIX,
    TOOL_ERROR_END, TOOL_ERROR_START, TOOL_USE_END, TOOL_USE_START,
};
