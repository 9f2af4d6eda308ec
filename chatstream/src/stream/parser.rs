// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Frame parser
//
// Turns arbitrarily split chunks of the chat transfer into an ordered
// sequence of events. State carried between chunks:
// - undecoded trailing bytes of a split UTF-8 sequence
// - the last incomplete line
// - whether we are inside a tool-use or tool-error span

use super::classifier::{
    classify_event_payload, collapse_artifact_spans, extract_inline_markers, parse_tool_payload,
};
use super::types::{Marker, SpanKind, StreamEvent, DATA_PREFIX};

/// Incremental parser for the chat stream framing.
///
/// Feeding the same bytes split at any boundaries yields the same events.
/// Malformed input is logged and dropped; nothing here returns an error.
#[derive(Debug, Default)]
pub struct StreamFrameParser {
    /// Bytes of an incomplete UTF-8 sequence from the previous chunk.
    pending_bytes: Vec<u8>,
    /// Text after the last newline seen so far.
    line_buffer: String,
    /// Open tool span, if any.
    span: Option<SpanKind>,
    /// Lines dropped as malformed (for diagnostics and tests).
    dropped_lines: usize,
}

impl StreamFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines dropped because they could not be parsed.
    pub fn dropped_lines(&self) -> usize {
        self.dropped_lines
    }

    /// Whether a tool span is currently open.
    pub fn in_span(&self) -> Option<SpanKind> {
        self.span
    }

    /// Feed raw bytes. Multi-byte characters split across chunks are held
    /// back until complete; invalid sequences become U+FFFD.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending_bytes.extend_from_slice(chunk);
        let decoded = decode_utf8_prefix(&mut self.pending_bytes);
        self.feed(&decoded)
    }

    /// Feed already-decoded text.
    pub fn feed(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.line_buffer.push_str(text);

        while let Some(newline_pos) = self.line_buffer.find('\n') {
            let mut line: String = self.line_buffer.drain(..=newline_pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.process_line(&line, &mut events);
        }

        events
    }

    /// Flush at end of stream: classify any unterminated final line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.line_buffer.push_str(&tail);
        }

        if !self.line_buffer.is_empty() {
            let mut line = std::mem::take(&mut self.line_buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.process_line(&line, &mut events);
        }

        if let Some(span) = self.span.take() {
            tracing::debug!(span = ?span, "stream ended inside an open tool span");
        }

        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        // 1. JSON event record
        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            match classify_event_payload(payload) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    self.dropped_lines += 1;
                    tracing::warn!(error = %e, "dropping malformed event line");
                }
            }
            return;
        }

        // 2. Bare marker line
        if let Some(marker) = Marker::parse(line.trim()) {
            self.apply_marker(marker);
            return;
        }

        // 3/4. Payload line inside a span
        if let Some(span) = self.span {
            self.process_span_line(span, line, events);
            return;
        }

        // SSE record separators carry no text.
        if line.trim().is_empty() {
            return;
        }

        // 5. Bare text, possibly with markers merged in
        self.process_text_line(line, events);
    }

    fn apply_marker(&mut self, marker: Marker) {
        match marker {
            Marker::Start(kind) => {
                if let Some(open) = self.span {
                    tracing::debug!(open = ?open, next = ?kind, "span reopened before end marker");
                }
                self.span = Some(kind);
            }
            Marker::End(kind) => {
                if self.span == Some(kind) {
                    self.span = None;
                } else {
                    tracing::debug!(marker = kind.end_token(), "ignoring unmatched end marker");
                }
            }
        }
    }

    fn process_span_line(&mut self, span: SpanKind, line: &str, events: &mut Vec<StreamEvent>) {
        let end_token = span.end_token();

        // Payload and end marker merged on one line.
        if let Some(end) = line.find(end_token) {
            self.push_tool_record(span, &line[..end], events);
            self.span = None;
            let rest = &line[end + end_token.len()..];
            if !rest.trim().is_empty() {
                self.process_text_line(rest, events);
            }
            return;
        }

        self.push_tool_record(span, line, events);
    }

    fn push_tool_record(&mut self, span: SpanKind, payload: &str, events: &mut Vec<StreamEvent>) {
        if payload.trim().is_empty() {
            return;
        }
        match parse_tool_payload(span, payload) {
            Ok(event) => events.push(event),
            Err(e) => {
                self.dropped_lines += 1;
                tracing::warn!(error = %e, "dropping malformed tool payload");
            }
        }
    }

    fn process_text_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let Some(extraction) = extract_inline_markers(line) else {
            let mut content = collapse_artifact_spans(line);
            content.push('\n');
            events.push(StreamEvent::Text { content });
            return;
        };

        for (span, payload) in &extraction.records {
            self.push_tool_record(*span, payload, events);
        }
        if let Some(span) = extraction.open {
            self.span = Some(span);
        }
        if !extraction.text.trim().is_empty() {
            let mut content = collapse_artifact_spans(&extraction.text);
            content.push('\n');
            events.push(StreamEvent::Text { content });
        }
    }
}

/// Decode the longest valid UTF-8 prefix of `buf`, leaving an incomplete
/// trailing sequence in place. Invalid bytes are replaced with U+FFFD.
fn decode_utf8_prefix(buf: &mut Vec<u8>) -> String {
    let mut out = String::with_capacity(buf.len());
    let mut start = 0;

    loop {
        match std::str::from_utf8(&buf[start..]) {
            Ok(valid) => {
                out.push_str(valid);
                start = buf.len();
                break;
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[start..valid_end]));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }

    buf.drain(..start);
    out
}
