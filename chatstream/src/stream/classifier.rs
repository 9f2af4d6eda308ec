// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Line classification
//
// Maps the payload of a `data: ` line to a typed event, parses the JSON
// records carried inside tool spans, and pulls marker-framed records out
// of lines where they arrived merged with ordinary text.

use super::types::{
    ControlKind, Marker, ParseError, SpanKind, StreamEvent, ARTIFACT_PLACEHOLDER, TOOL_ERROR_END,
    TOOL_ERROR_START, TOOL_USE_END, TOOL_USE_START,
};
use crate::artifact::ArtifactPatch;
use serde_json::Value;

// ---------------------------------------------------------------------------
// JSON event lines
// ---------------------------------------------------------------------------

/// Classify the JSON payload of a `data: ` line (prefix already removed).
///
/// Returns `Ok(None)` for event types this client does not know, so newer
/// producers can add types without breaking older clients.
pub fn classify_event_payload(payload: &str) -> Result<Option<StreamEvent>, ParseError> {
    let json: Value = serde_json::from_str(payload).map_err(|e| ParseError::MalformedEvent {
        reason: e.to_string(),
    })?;

    let event_type = json
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ParseError::MissingType)?;

    let event = match event_type {
        "text" => {
            let content = string_field(&json, &["content", "text"])
                .ok_or_else(|| invalid(event_type, "missing string \"content\""))?;
            StreamEvent::Text {
                content: collapse_artifact_spans(content),
            }
        }
        "artifacts_update" => {
            let items = field(&json, &["content", "items", "artifacts"])
                .cloned()
                .ok_or_else(|| invalid(event_type, "missing \"content\" array"))?;
            let items: Vec<ArtifactPatch> =
                serde_json::from_value(items).map_err(|e| invalid(event_type, &e.to_string()))?;
            StreamEvent::ArtifactsUpdate { items }
        }
        "artifact" => {
            let item = field(&json, &["content", "artifact"])
                .cloned()
                .ok_or_else(|| invalid(event_type, "missing \"content\" object"))?;
            let item: ArtifactPatch =
                serde_json::from_value(item).map_err(|e| invalid(event_type, &e.to_string()))?;
            StreamEvent::Artifact { item }
        }
        "artifacts_remove" => {
            let entries = field(&json, &["content", "ids"])
                .and_then(|v| v.as_array())
                .ok_or_else(|| invalid(event_type, "missing \"content\" array"))?;
            StreamEvent::ArtifactsRemove {
                ids: removal_ids(entries),
            }
        }
        "context_status" => {
            let text = string_field(&json, &["content", "text", "message", "status"])
                .ok_or_else(|| invalid(event_type, "missing status text"))?;
            StreamEvent::ContextStatus {
                text: text.to_string(),
            }
        }
        "context_percentage" => {
            let percentage = field(&json, &["percentage", "content", "usage_percentage"])
                .and_then(|v| v.as_f64())
                .ok_or_else(|| invalid(event_type, "missing numeric percentage"))?;
            StreamEvent::ContextPercentage { percentage }
        }
        "complete" => StreamEvent::Control(ControlKind::Complete),
        "hide_warning" => StreamEvent::Control(ControlKind::HideWarning),
        "error" => StreamEvent::Control(ControlKind::Error(error_message(&json, "unknown error"))),
        "timeout_error" => StreamEvent::Control(ControlKind::TimeoutError(error_message(
            &json,
            "the server timed out",
        ))),
        "rate_limit_error" => StreamEvent::Control(ControlKind::RateLimitError(error_message(
            &json,
            "rate limit exceeded",
        ))),
        "connection_error" => StreamEvent::Control(ControlKind::ConnectionError(error_message(
            &json,
            "connection to the model was lost",
        ))),
        "stream_error" => StreamEvent::Control(ControlKind::StreamError(error_message(
            &json,
            "the response stream failed",
        ))),
        other => {
            tracing::debug!(event_type = other, "ignoring unknown event type");
            return Ok(None);
        }
    };

    Ok(Some(event))
}

fn field<'a>(json: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| json.get(*name))
}

fn string_field<'a>(json: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| json.get(*name).and_then(|v| v.as_str()))
}

fn error_message(json: &Value, default: &str) -> String {
    string_field(json, &["content", "message", "error"])
        .unwrap_or(default)
        .to_string()
}

fn invalid(event_type: &str, reason: &str) -> ParseError {
    ParseError::InvalidPayload {
        event_type: event_type.to_string(),
        reason: reason.to_string(),
    }
}

/// Removal entries are either `{"id": "..."}` objects or bare id strings.
fn removal_ids(entries: &[Value]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(id) => Some(id.clone()),
            Value::Object(obj) => obj.get("id").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tool span payloads
// ---------------------------------------------------------------------------

/// Parse one JSON record found inside a tool span.
pub fn parse_tool_payload(span: SpanKind, line: &str) -> Result<StreamEvent, ParseError> {
    let payload: Value =
        serde_json::from_str(line.trim()).map_err(|e| ParseError::MalformedToolPayload {
            span,
            reason: e.to_string(),
        })?;

    Ok(match span {
        SpanKind::ToolUse => StreamEvent::ToolUse {
            tool_id: tool_id_of(&payload),
            payload,
        },
        SpanKind::ToolError => StreamEvent::ToolError { payload },
    })
}

/// Dedup key for a tool record: its id field when present, otherwise the
/// compact JSON text, so identical records still collapse.
fn tool_id_of(payload: &Value) -> String {
    string_field(payload, &["tool_id", "id", "tool_use_id"])
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

// ---------------------------------------------------------------------------
// Inline markers
// ---------------------------------------------------------------------------

/// Result of pulling marker-framed records out of a text line.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineExtraction {
    /// The line with every marker and span payload removed.
    pub text: String,
    /// Span payloads found on the line, in order.
    pub records: Vec<(SpanKind, String)>,
    /// Set when a start marker was not closed on this line.
    pub open: Option<SpanKind>,
}

const MARKER_TOKENS: [(&str, Marker); 4] = [
    (TOOL_USE_START, Marker::Start(SpanKind::ToolUse)),
    (TOOL_USE_END, Marker::End(SpanKind::ToolUse)),
    (TOOL_ERROR_START, Marker::Start(SpanKind::ToolError)),
    (TOOL_ERROR_END, Marker::End(SpanKind::ToolError)),
];

fn next_marker(haystack: &str) -> Option<(usize, Marker, usize)> {
    MARKER_TOKENS
        .iter()
        .filter_map(|(token, marker)| haystack.find(token).map(|pos| (pos, *marker, token.len())))
        .min_by_key(|(pos, _, _)| *pos)
}

/// Extract marker spans embedded in `line`. Returns `None` when the line
/// holds no marker token at all.
///
/// A start marker with no matching end on the same line leaves the span
/// open; whatever follows the marker is taken as that span's payload.
/// Stray end markers are removed.
pub fn extract_inline_markers(line: &str) -> Option<InlineExtraction> {
    next_marker(line)?;

    let mut text = String::with_capacity(line.len());
    let mut records = Vec::new();
    let mut open = None;
    let mut rest = line;

    while let Some((pos, marker, len)) = next_marker(rest) {
        text.push_str(&rest[..pos]);
        let after = &rest[pos + len..];

        match marker {
            Marker::End(_) => rest = after,
            Marker::Start(kind) => match after.find(kind.end_token()) {
                Some(end) => {
                    push_record(&mut records, kind, &after[..end]);
                    rest = &after[end + kind.end_token().len()..];
                }
                None => {
                    push_record(&mut records, kind, after);
                    open = Some(kind);
                    rest = "";
                    break;
                }
            },
        }
    }
    text.push_str(rest);

    Some(InlineExtraction {
        text,
        records,
        open,
    })
}

fn push_record(records: &mut Vec<(SpanKind, String)>, kind: SpanKind, payload: &str) {
    let payload = payload.trim();
    if !payload.is_empty() {
        records.push((kind, payload.to_string()));
    }
}

/// Remove tool spans from accumulated display text.
///
/// Complete spans are dropped; an unterminated span hides everything after
/// its start marker until the end marker arrives.
pub fn strip_tool_spans(text: &str) -> String {
    match extract_inline_markers(text) {
        Some(extraction) => extraction.text,
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Legacy artifact tags
// ---------------------------------------------------------------------------

const ARTIFACT_OPEN: &str = "<artifact";
const ARTIFACT_CLOSE: &str = "</artifact>";

/// Collapse every complete `<artifact ...>...</artifact>` span to a
/// placeholder. An unclosed tag is left untouched.
pub fn collapse_artifact_spans(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(ARTIFACT_OPEN) {
        let Some(close) = rest[start..].find(ARTIFACT_CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(ARTIFACT_PLACEHOLDER);
        rest = &rest[start + close + ARTIFACT_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}
