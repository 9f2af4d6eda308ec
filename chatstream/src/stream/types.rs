// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Typed events extracted from the chat transfer, the tool-marker tokens
// that frame hidden tool records, and the diagnostic parse error.

use crate::artifact::ArtifactPatch;
use std::fmt;

// ---------------------------------------------------------------------------
// Wire tokens
// ---------------------------------------------------------------------------

/// Prefix of a JSON event record. Exactly six bytes, including the space.
pub const DATA_PREFIX: &str = "data: ";

pub const TOOL_USE_START: &str = "TOOL_USE_START";
pub const TOOL_USE_END: &str = "TOOL_USE_END";
pub const TOOL_ERROR_START: &str = "TOOL_ERROR_START";
pub const TOOL_ERROR_END: &str = "TOOL_ERROR_END";

/// Text substituted for a fully-buffered `<artifact>...</artifact>` span
/// found inside display text.
pub const ARTIFACT_PLACEHOLDER: &str = "[artifact: see side panel]";

// ---------------------------------------------------------------------------
// Tool spans
// ---------------------------------------------------------------------------

/// Which kind of marker-delimited region the parser is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    ToolUse,
    ToolError,
}

impl SpanKind {
    pub fn start_token(self) -> &'static str {
        match self {
            SpanKind::ToolUse => TOOL_USE_START,
            SpanKind::ToolError => TOOL_ERROR_START,
        }
    }

    pub fn end_token(self) -> &'static str {
        match self {
            SpanKind::ToolUse => TOOL_USE_END,
            SpanKind::ToolError => TOOL_ERROR_END,
        }
    }
}

/// One of the four literal marker lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Start(SpanKind),
    End(SpanKind),
}

impl Marker {
    /// Recognize a line that is exactly one marker token.
    pub fn parse(line: &str) -> Option<Marker> {
        match line {
            TOOL_USE_START => Some(Marker::Start(SpanKind::ToolUse)),
            TOOL_USE_END => Some(Marker::End(SpanKind::ToolUse)),
            TOOL_ERROR_START => Some(Marker::Start(SpanKind::ToolError)),
            TOOL_ERROR_END => Some(Marker::End(SpanKind::ToolError)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Terminal and advisory signals sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    Complete,
    HideWarning,
    Error(String),
    TimeoutError(String),
    RateLimitError(String),
    ConnectionError(String),
    StreamError(String),
}

/// One classified unit of meaning extracted from the transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text to append to the current assistant message.
    Text { content: String },
    /// Upsert deltas for one or more artifacts.
    ArtifactsUpdate { items: Vec<ArtifactPatch> },
    /// Legacy single-artifact record; may lack an id.
    Artifact { item: ArtifactPatch },
    /// Artifact ids to delete.
    ArtifactsRemove { ids: Vec<String> },
    /// Hidden tool invocation record, tracked only for dedup.
    ToolUse {
        tool_id: String,
        payload: serde_json::Value,
    },
    /// Hidden tool failure record, logged only.
    ToolError { payload: serde_json::Value },
    ContextStatus { text: String },
    ContextPercentage { percentage: f64 },
    Control(ControlKind),
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        StreamEvent::Text {
            content: content.into(),
        }
    }

    /// Short label for structured logging.
    pub fn label(&self) -> &'static str {
        match self {
            StreamEvent::Text { .. } => "text",
            StreamEvent::ArtifactsUpdate { .. } => "artifacts_update",
            StreamEvent::Artifact { .. } => "artifact",
            StreamEvent::ArtifactsRemove { .. } => "artifacts_remove",
            StreamEvent::ToolUse { .. } => "tool_use",
            StreamEvent::ToolError { .. } => "tool_error",
            StreamEvent::ContextStatus { .. } => "context_status",
            StreamEvent::ContextPercentage { .. } => "context_percentage",
            StreamEvent::Control(_) => "control",
        }
    }
}

// ---------------------------------------------------------------------------
// Parse diagnostics
// ---------------------------------------------------------------------------

/// A line the parser could not use. Logged and dropped, never returned to
/// callers of the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// A `data: ` payload was not valid JSON.
    MalformedEvent { reason: String },
    /// A JSON event was missing its `type` field.
    MissingType,
    /// A recognized event type carried a payload of the wrong shape.
    InvalidPayload { event_type: String, reason: String },
    /// A line inside a tool span was not valid JSON.
    MalformedToolPayload { span: SpanKind, reason: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MalformedEvent { reason } => {
                write!(f, "malformed event line: {reason}")
            }
            ParseError::MissingType => write!(f, "event object has no \"type\" field"),
            ParseError::InvalidPayload { event_type, reason } => {
                write!(f, "invalid payload for event '{event_type}': {reason}")
            }
            ParseError::MalformedToolPayload { span, reason } => {
                let kind = match span {
                    SpanKind::ToolUse => "tool-use",
                    SpanKind::ToolError => "tool-error",
                };
                write!(f, "malformed {kind} payload: {reason}")
            }
        }
    }
}

impl std::error::Error for ParseError {}
