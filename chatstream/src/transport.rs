// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Chat transport
//
// Responsibilities:
// - Define the ChatTransport seam the session controller talks to
// - Request/response types for the chat, context and key-validation endpoints
// - ReqwestTransport: the HTTP implementation, streaming the chat body

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::config::TransportConfig;
use crate::context::ContextUsage;
use crate::error::{ChatError, HttpErrorKind};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of the chat POST.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// An open chat transfer. The body is read lazily.
pub struct ChatResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
struct ContextRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ValidateKeyRequest<'a> {
    api_key: &'a str,
}

/// Response of the key-validation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("response body failed: {0}")]
    Body(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("could not build HTTP client: {0}")]
    Build(String),
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(msg) => ChatError::Timeout(msg),
            TransportError::Connect(msg) => ChatError::Network(msg),
            TransportError::Body(msg) => ChatError::Stream(msg),
            TransportError::Status { status, message } => match reqwest::StatusCode::from_u16(status) {
                Ok(code) => ChatError::from_status(code, message),
                Err(_) => ChatError::Http {
                    status,
                    kind: HttpErrorKind::Other,
                    message,
                },
            },
            TransportError::Decode(msg) | TransportError::Build(msg) => ChatError::Generic(msg),
        }
    }
}

fn classify_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Trait: ChatTransport (dependency injection point)
// ---------------------------------------------------------------------------

/// The server side of the conversation.
///
/// Implementations must be Send + Sync so one transport can be shared by
/// the controller and background pollers via `Arc`.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// POST a message and return the streaming body. Non-2xx statuses are
    /// returned as `TransportError::Status`.
    async fn open(&self, request: ChatRequest) -> Result<ChatResponse, TransportError>;

    /// Poll context-window usage for a session.
    async fn context_status(&self, session_id: &str) -> Result<ContextUsage, TransportError>;

    /// Ask the server whether an API key is usable.
    async fn validate_key(&self, api_key: &str) -> Result<KeyValidation, TransportError>;
}

// ---------------------------------------------------------------------------
// Reqwest transport
// ---------------------------------------------------------------------------

/// Longest error-body excerpt kept in a `Status` error.
const ERROR_EXCERPT_BYTES: usize = 512;

pub struct ReqwestTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, config: TransportConfig) -> Self {
        Self { client, config }
    }

    /// Build a client honouring the configured connect timeout.
    pub fn from_config(config: TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn post_json<B, R>(&self, url: String, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + Sync,
        R: serde::de::DeserializeOwned + Send,
    {
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let resp = error_for_status(resp).await?;
        resp.json::<R>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = excerpt(&body, ERROR_EXCERPT_BYTES);
    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}

fn excerpt(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.trim().to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", body[..end].trim_end())
}

#[async_trait]
impl ChatTransport for ReqwestTransport {
    async fn open(&self, request: ChatRequest) -> Result<ChatResponse, TransportError> {
        let url = self.config.chat_url();
        tracing::debug!(url = %url, session_id = %request.session_id, "opening chat stream");

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let resp = error_for_status(resp).await?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes_stream()
            .map_err(|e| TransportError::Body(e.to_string()));

        Ok(ChatResponse {
            status,
            body: Box::pin(body),
        })
    }

    async fn context_status(&self, session_id: &str) -> Result<ContextUsage, TransportError> {
        self.post_json(self.config.context_url(), &ContextRequest { session_id })
            .await
    }

    async fn validate_key(&self, api_key: &str) -> Result<KeyValidation, TransportError> {
        self.post_json(self.config.validate_key_url(), &ValidateKeyRequest { api_key })
            .await
    }
}
