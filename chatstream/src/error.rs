// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Request-level error taxonomy.
//
// Parser-level failures never reach this type: they are logged and the
// offending line is dropped (see `stream::ParseError`). Everything here is
// surfaced to the session controller, which turns it into exactly one
// user-visible message.

use reqwest::StatusCode;

// ---------------------------------------------------------------------------
// HTTP status classification
// ---------------------------------------------------------------------------

/// How a non-2xx chat response is framed to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// 429 Too Many Requests.
    RateLimited,
    /// 503 Service Unavailable.
    ServiceUnavailable,
    /// Any other non-success status.
    Other,
}

impl HttpErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => HttpErrorKind::RateLimited,
            StatusCode::SERVICE_UNAVAILABLE => HttpErrorKind::ServiceUnavailable,
            _ => HttpErrorKind::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatError
// ---------------------------------------------------------------------------

/// Errors that end a request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    /// The hard deadline elapsed with no stream activity.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server signalled a rate limit mid-stream.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// The server lost its upstream connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server signalled a failure while streaming.
    #[error("stream error: {0}")]
    Stream(String),

    /// The chat endpoint answered with a non-2xx status.
    #[error("http error {status}: {message}")]
    Http {
        status: u16,
        kind: HttpErrorKind,
        message: String,
    },

    /// The transport failed before any response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// The request was cancelled by the user or by the timeout machinery.
    #[error("request aborted")]
    Aborted,

    /// The deployment requires an API key and none was supplied.
    #[error("an API key is required")]
    MissingApiKey,

    /// Anything else, including a server `error` event.
    #[error("{0}")]
    Generic(String),
}

impl ChatError {
    /// Build an `Http` error from a response status and body excerpt.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        ChatError::Http {
            status: status.as_u16(),
            kind: HttpErrorKind::from_status(status),
            message: message.into(),
        }
    }

    /// Whether the user should be offered a retry that replays the last message.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChatError::Aborted | ChatError::MissingApiKey)
    }

    /// Short machine label, used as a structured logging field.
    pub fn kind_label(&self) -> &'static str {
        match self {
            ChatError::Timeout(_) => "timeout",
            ChatError::RateLimit(_) => "rate_limit",
            ChatError::Connection(_) => "connection",
            ChatError::Stream(_) => "stream",
            ChatError::Http { .. } => "http",
            ChatError::Network(_) => "network",
            ChatError::Aborted => "aborted",
            ChatError::MissingApiKey => "missing_api_key",
            ChatError::Generic(_) => "generic",
        }
    }

    /// The single line shown to the user for this error.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Timeout(_) => {
                "The response took too long and was stopped. Please try again.".to_string()
            }
            ChatError::RateLimit(msg) => format!("Rate limit reached: {msg}. Please wait a moment."),
            ChatError::Connection(msg) => format!("Connection problem: {msg}"),
            ChatError::Stream(msg) => format!("The response stream failed: {msg}"),
            ChatError::Http { status, kind, .. } => match kind {
                HttpErrorKind::RateLimited => {
                    "Too many requests. Please wait a moment before trying again.".to_string()
                }
                HttpErrorKind::ServiceUnavailable => {
                    "The service is temporarily unavailable. Please try again shortly.".to_string()
                }
                HttpErrorKind::Other => format!("The server returned an error (HTTP {status})."),
            },
            ChatError::Network(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            ChatError::Aborted => "Request cancelled.".to_string(),
            ChatError::MissingApiKey => "Please set an API key before sending messages.".to_string(),
            ChatError::Generic(msg) => msg.clone(),
        }
    }
}
