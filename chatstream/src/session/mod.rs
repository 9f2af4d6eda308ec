// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Response session controller
//
// Responsibilities:
// - Enforce one in-flight request per session
// - Open the chat transfer via the injected ChatTransport
// - Apply parsed events to session state (text, artifacts, tool dedup,
//   context telemetry) and push render data to the injected Renderer
// - Race the event stream against the timeout state machine and the
//   user's abort signal
// - Classify the way a request ended into exactly one outcome

use chrono::Utc;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::artifact::ArtifactReconciler;
use crate::config::Config;
use crate::context::{ContextTelemetry, ContextUsage};
use crate::error::ChatError;
use crate::render::{build_cards, ArtifactCard, ArtifactViewState, Role, TranscriptEntry};
use crate::stream::{
    collapse_artifact_spans, event_stream, strip_tool_spans, ControlKind, StreamEvent,
};
use crate::timeout::{TimeoutSettings, TimeoutSignal, TimeoutStateMachine};
use crate::transport::{ChatRequest, ChatTransport, KeyValidation};

// ---------------------------------------------------------------------------
// Renderer (dependency injection point)
// ---------------------------------------------------------------------------

/// Receives render data as the session changes. Every method defaults to a
/// no-op so front ends implement only what they draw.
///
/// Called from the task driving `send`; implementations must not block.
pub trait Renderer: Send + Sync {
    fn user_message(&self, _entry: &TranscriptEntry) {}

    /// Full display text of the current assistant message, tool spans removed.
    fn assistant_text(&self, _text: &str) {}

    fn artifacts_changed(&self, _cards: &[ArtifactCard]) {}

    /// `soft`: artifacts are still building, show status only.
    fn timeout_warning(&self, _soft: bool) {}

    fn timeout_warning_cleared(&self) {}

    fn timeout_extended(&self, _grace: Duration) {}

    fn context_changed(&self, _telemetry: &ContextTelemetry) {}

    fn request_cancelled(&self) {}

    /// The request failed; `retryable` offers a replay of the last message.
    fn request_failed(&self, _error: &ChatError, _retryable: bool) {}
}

/// A renderer that draws nothing.
pub struct NullRenderer;

impl Renderer for NullRenderer {}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Mutable state of one conversation.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Raw text of the current response, reset per request.
    pub accumulated_text: String,
    /// Tool records already seen during the current request.
    pub processed_tool_ids: HashSet<String>,
    /// Persists across requests; cleared only on user request.
    pub artifacts: ArtifactReconciler,
    pub view: ArtifactViewState,
    pub transcript: Vec<TranscriptEntry>,
    pub context: ContextTelemetry,
    pub api_key: Option<String>,
    pub last_user_message: Option<String>,
    pub last_error: Option<ChatError>,
    /// Transcript index of the current assistant entry, once created.
    assistant_entry: Option<usize>,
}

impl SessionState {
    fn begin_request(&mut self, message: &str) -> TranscriptEntry {
        self.accumulated_text.clear();
        self.processed_tool_ids.clear();
        self.assistant_entry = None;
        self.last_error = None;
        self.last_user_message = Some(message.to_string());

        let entry = TranscriptEntry::new(Role::User, message);
        self.transcript.push(entry.clone());
        entry
    }

    /// Accumulated text as shown to the user: tool spans hidden, complete
    /// artifact spans replaced by a placeholder.
    fn display_text(&self) -> String {
        collapse_artifact_spans(&strip_tool_spans(&self.accumulated_text))
    }

    /// Append a text delta and return the new display text.
    fn append_text(&mut self, delta: &str) -> String {
        self.accumulated_text.push_str(delta);
        let display = self.display_text();

        match self.assistant_entry {
            Some(index) => {
                if let Some(entry) = self.transcript.get_mut(index) {
                    entry.content.clone_from(&display);
                }
            }
            None => {
                self.transcript
                    .push(TranscriptEntry::new(Role::Assistant, display.clone()));
                self.assistant_entry = Some(self.transcript.len() - 1);
            }
        }
        display
    }

    fn cards(&self) -> Vec<ArtifactCard> {
        build_cards(&self.artifacts, &self.view)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How a completed request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The server sent a `complete` event.
    CompleteEvent,
    /// The body ended without one.
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSummary {
    pub request_id: String,
    pub ended_by: EndReason,
    /// Display text of the assistant message.
    pub text: String,
    pub tool_uses: usize,
    pub artifact_count: usize,
    pub warning_fired: bool,
    pub elapsed: Duration,
}

/// Non-error results of `send`.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Completed(ResponseSummary),
    /// The user cancelled; informational only.
    Cancelled,
    /// Another request is in flight; nothing was sent.
    Busy,
    /// The message was blank, or there was nothing to retry.
    Empty,
}

enum Ended {
    Finished(EndReason),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub timeouts: TimeoutSettings,
    pub require_api_key: bool,
    pub api_key: Option<String>,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            timeouts: config.timeouts.into(),
            require_api_key: config.auth.require_api_key,
            api_key: config.auth.api_key.clone(),
        }
    }
}

pub fn generate_session_id() -> String {
    format!(
        "session_{}_{}",
        uuid::Uuid::new_v4().simple(),
        Utc::now().timestamp_millis()
    )
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

/// Releases the in-flight flag and the abort handle however `send` exits.
struct InFlightGuard<'a> {
    controller: &'a SessionController,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.controller
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.controller.in_flight.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct SessionController {
    transport: Arc<dyn ChatTransport>,
    renderer: Arc<dyn Renderer>,
    settings: TimeoutSettings,
    require_api_key: bool,
    session_id: String,
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
    abort: Mutex<Option<watch::Sender<bool>>>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        renderer: Arc<dyn Renderer>,
        options: SessionOptions,
    ) -> Self {
        let state = SessionState {
            api_key: options.api_key,
            ..SessionState::default()
        };
        Self {
            transport,
            renderer,
            settings: options.timeouts,
            require_api_key: options.require_api_key,
            session_id: generate_session_id(),
            state: Mutex::new(state),
            in_flight: AtomicBool::new(false),
            abort: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Accessors ----------------------------------------------------------

    pub fn accumulated_text(&self) -> String {
        self.state().accumulated_text.clone()
    }

    pub fn display_text(&self) -> String {
        self.state().display_text()
    }

    pub fn processed_tool_ids(&self) -> HashSet<String> {
        self.state().processed_tool_ids.clone()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.state().transcript.clone()
    }

    pub fn artifact_cards(&self) -> Vec<ArtifactCard> {
        self.state().cards()
    }

    pub fn context(&self) -> ContextTelemetry {
        self.state().context.clone()
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.state().last_error.clone()
    }

    pub fn has_api_key(&self) -> bool {
        self.state().api_key.is_some()
    }

    /// Run `f` with read access to the full session state.
    pub fn with_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.state())
    }

    // -- Requests -----------------------------------------------------------

    /// Send a user message and drive the response to its end.
    ///
    /// Returns `Busy` without side effects while another request is in
    /// flight. Errors have already been recorded in the transcript and
    /// reported to the renderer when this returns.
    pub async fn send(&self, message: &str) -> Result<SendOutcome, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Ok(SendOutcome::Empty);
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(session_id = %self.session_id, "send ignored, request in flight");
            return Ok(SendOutcome::Busy);
        }
        let _guard = InFlightGuard { controller: self };

        let (abort_tx, abort_rx) = watch::channel(false);
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(abort_tx);

        let api_key = self.state().api_key.clone();
        if self.require_api_key && api_key.is_none() {
            tracing::warn!(session_id = %self.session_id, "send refused, no API key set");
            self.state().last_error = Some(ChatError::MissingApiKey);
            self.renderer.request_failed(&ChatError::MissingApiKey, false);
            return Err(ChatError::MissingApiKey);
        }

        let user_entry = self.state().begin_request(message);
        self.renderer.user_message(&user_entry);

        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let request = ChatRequest {
            message: message.to_string(),
            session_id: self.session_id.clone(),
            api_key,
        };

        tracing::info!(
            session_id = %self.session_id,
            request_id = %request_id,
            "request started"
        );

        let started = Instant::now();
        let mut timer = TimeoutStateMachine::new(self.settings);
        timer.start(started);

        let result = self.drive(request, &mut timer, abort_rx).await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ended::Finished(ended_by)) => {
                timer.complete();
                let summary = {
                    let state = self.state();
                    ResponseSummary {
                        request_id: request_id.clone(),
                        ended_by,
                        text: state.display_text(),
                        tool_uses: state.processed_tool_ids.len(),
                        artifact_count: state.artifacts.len(),
                        warning_fired: timer.warning_fired(),
                        elapsed,
                    }
                };
                tracing::info!(
                    session_id = %self.session_id,
                    request_id = %request_id,
                    state = %timer.state(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request completed"
                );
                Ok(SendOutcome::Completed(summary))
            }
            Ok(Ended::Cancelled) => {
                timer.cancel();
                tracing::info!(
                    session_id = %self.session_id,
                    request_id = %request_id,
                    state = %timer.state(),
                    "request cancelled"
                );
                // Recorded but never shown as a failure; not retryable.
                self.state().last_error = Some(ChatError::Aborted);
                self.renderer.request_cancelled();
                Ok(SendOutcome::Cancelled)
            }
            Err(err) => {
                // Expiry already left the machine terminal.
                timer.complete();
                tracing::error!(
                    session_id = %self.session_id,
                    request_id = %request_id,
                    state = %timer.state(),
                    error_kind = err.kind_label(),
                    error = %err,
                    "request failed"
                );
                {
                    let mut state = self.state();
                    state.last_error = Some(err.clone());
                    state.transcript.push(TranscriptEntry::error(format!(
                        "Sorry, I encountered an error: {}",
                        err.user_message()
                    )));
                }
                self.renderer.request_failed(&err, err.is_retryable());
                Err(err)
            }
        }
    }

    /// Replay the last user message if the last request failed with a
    /// retryable error. Otherwise returns `Empty`.
    pub async fn retry(&self) -> Result<SendOutcome, ChatError> {
        let message = {
            let state = self.state();
            match (&state.last_error, &state.last_user_message) {
                (Some(err), Some(message)) if err.is_retryable() => message.clone(),
                _ => return Ok(SendOutcome::Empty),
            }
        };
        tracing::info!(session_id = %self.session_id, "retrying last message");
        self.send(&message).await
    }

    /// Abort the in-flight request. Returns false when nothing is in flight.
    pub fn cancel(&self) -> bool {
        let slot = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    async fn drive(
        &self,
        request: ChatRequest,
        timer: &mut TimeoutStateMachine,
        mut abort: watch::Receiver<bool>,
    ) -> Result<Ended, ChatError> {
        let open = self.transport.open(request);
        tokio::pin!(open);

        let response = loop {
            let deadline = timer.next_deadline();
            tokio::select! {
                biased;
                _ = abort.changed() => return Ok(Ended::Cancelled),
                result = &mut open => break result?,
                _ = sleep_until(deadline) => self.on_deadline(timer)?,
            }
        };

        tracing::debug!(session_id = %self.session_id, status = response.status, "chat stream open");
        let mut events = event_stream(response.body);

        loop {
            let deadline = timer.next_deadline();
            tokio::select! {
                biased;
                _ = abort.changed() => return Ok(Ended::Cancelled),
                item = events.next() => match item {
                    None => return Ok(Ended::Finished(EndReason::EndOfStream)),
                    Some(Err(err)) => return Err(err),
                    Some(Ok(event)) => {
                        if timer.record_activity(Instant::now()) == Some(TimeoutSignal::WarningCleared) {
                            self.renderer.timeout_warning_cleared();
                        }
                        if let Some(reason) = self.apply_event(event)? {
                            return Ok(Ended::Finished(reason));
                        }
                    }
                },
                _ = sleep_until(deadline) => self.on_deadline(timer)?,
            }
        }
    }

    fn on_deadline(&self, timer: &mut TimeoutStateMachine) -> Result<(), ChatError> {
        let has_incomplete = self.state().artifacts.has_incomplete();
        match timer.poll(Instant::now(), has_incomplete) {
            Some(TimeoutSignal::Warning { soft }) => {
                tracing::warn!(session_id = %self.session_id, soft, "response is slow");
                self.renderer.timeout_warning(soft);
            }
            Some(TimeoutSignal::Extended { grace }) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    grace_secs = grace.as_secs(),
                    "artifacts still building, extending deadline"
                );
                self.renderer.timeout_extended(grace);
            }
            Some(TimeoutSignal::Expired) => {
                tracing::warn!(session_id = %self.session_id, state = %timer.state(), "request expired");
                return Err(ChatError::Timeout(format!(
                    "no response activity for {} seconds",
                    self.settings.hard.as_secs()
                )));
            }
            Some(TimeoutSignal::WarningCleared) | None => {}
        }
        Ok(())
    }

    /// Apply one event to session state. Returns the end reason for a
    /// completion event; server-signalled failures become errors.
    fn apply_event(&self, event: StreamEvent) -> Result<Option<EndReason>, ChatError> {
        tracing::debug!(session_id = %self.session_id, event = event.label(), "stream event");

        match event {
            StreamEvent::Text { content } => {
                let display = self.state().append_text(&content);
                self.renderer.assistant_text(&display);
            }
            StreamEvent::ArtifactsUpdate { items } => {
                let cards = {
                    let mut state = self.state();
                    for id in state.artifacts.apply_updates(items) {
                        tracing::debug!(session_id = %self.session_id, artifact_id = %id, "artifact upserted");
                    }
                    state.cards()
                };
                self.renderer.artifacts_changed(&cards);
            }
            StreamEvent::Artifact { item } => {
                let cards = {
                    let mut state = self.state();
                    let id = state.artifacts.add_legacy(item);
                    tracing::debug!(session_id = %self.session_id, artifact_id = %id, "legacy artifact added");
                    state.cards()
                };
                self.renderer.artifacts_changed(&cards);
            }
            StreamEvent::ArtifactsRemove { ids } => {
                let cards = {
                    let mut state = self.state();
                    let removed = state.artifacts.apply_removals(&ids);
                    let SessionState { artifacts, view, .. } = &mut *state;
                    view.retain_existing(artifacts);
                    tracing::debug!(session_id = %self.session_id, removed, "artifacts removed");
                    state.cards()
                };
                self.renderer.artifacts_changed(&cards);
            }
            StreamEvent::ToolUse { tool_id, .. } => {
                let fresh = self.state().processed_tool_ids.insert(tool_id.clone());
                if fresh {
                    tracing::debug!(session_id = %self.session_id, tool_id = %tool_id, "tool use recorded");
                } else {
                    tracing::debug!(session_id = %self.session_id, tool_id = %tool_id, "duplicate tool use ignored");
                }
            }
            StreamEvent::ToolError { payload } => {
                tracing::warn!(session_id = %self.session_id, payload = %payload, "tool reported an error");
            }
            StreamEvent::ContextStatus { text } => {
                let telemetry = {
                    let mut state = self.state();
                    state.context.record_status(text);
                    state.context.clone()
                };
                self.renderer.context_changed(&telemetry);
            }
            StreamEvent::ContextPercentage { percentage } => {
                let telemetry = {
                    let mut state = self.state();
                    state.context.record_percentage(percentage);
                    state.context.clone()
                };
                self.renderer.context_changed(&telemetry);
            }
            StreamEvent::Control(kind) => return control_outcome(kind, self.renderer.as_ref()),
        }
        Ok(None)
    }

    // -- Artifacts ----------------------------------------------------------

    /// Empty the artifact panel. User-initiated only.
    pub fn clear_artifacts(&self) {
        {
            let mut state = self.state();
            state.artifacts.clear();
            state.view.clear();
        }
        tracing::info!(session_id = %self.session_id, "artifacts cleared");
        self.renderer.artifacts_changed(&[]);
    }

    /// Flip a card's collapsed state; see `ArtifactViewState::toggle`.
    pub fn toggle_artifact(&self, id: &str) -> Option<bool> {
        let (collapsed, cards) = {
            let mut state = self.state();
            let SessionState { artifacts, view, .. } = &mut *state;
            let collapsed = view.toggle(artifacts, id)?;
            (collapsed, state.cards())
        };
        self.renderer.artifacts_changed(&cards);
        Some(collapsed)
    }

    // -- Side endpoints -----------------------------------------------------

    /// Poll the server for context-window usage and record it.
    pub async fn poll_context(&self) -> Result<ContextUsage, ChatError> {
        let usage = self.transport.context_status(&self.session_id).await?;
        let telemetry = {
            let mut state = self.state();
            state.context.record_usage(&usage);
            state.context.clone()
        };
        tracing::debug!(
            session_id = %self.session_id,
            usage_percentage = usage.usage_percentage,
            level = %usage.level(),
            "context polled"
        );
        self.renderer.context_changed(&telemetry);
        Ok(usage)
    }

    /// Validate a key with the server and adopt it when valid.
    pub async fn validate_api_key(&self, api_key: &str) -> Result<KeyValidation, ChatError> {
        let api_key = api_key.trim();
        let validation = self.transport.validate_key(api_key).await?;
        if validation.valid {
            self.set_api_key(Some(api_key.to_string()));
            tracing::info!(
                session_id = %self.session_id,
                tools_count = validation.tools_count,
                "API key validated"
            );
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                error = validation.error.as_deref().unwrap_or("unknown"),
                "API key rejected"
            );
        }
        Ok(validation)
    }

    pub fn set_api_key(&self, api_key: Option<String>) {
        self.state().api_key = api_key.filter(|k| !k.trim().is_empty());
    }
}

fn control_outcome(kind: ControlKind, renderer: &dyn Renderer) -> Result<Option<EndReason>, ChatError> {
    match kind {
        ControlKind::Complete => Ok(Some(EndReason::CompleteEvent)),
        ControlKind::HideWarning => {
            renderer.timeout_warning_cleared();
            Ok(None)
        }
        ControlKind::Error(msg) => Err(ChatError::Generic(msg)),
        ControlKind::TimeoutError(msg) => Err(ChatError::Timeout(msg)),
        ControlKind::RateLimitError(msg) => Err(ChatError::RateLimit(msg)),
        ControlKind::ConnectionError(msg) => Err(ChatError::Connection(msg)),
        ControlKind::StreamError(msg) => Err(ChatError::Stream(msg)),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
