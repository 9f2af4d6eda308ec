// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Tests for the response session controller
//
// Tests cover:
//  1. Text deltas accumulate and create one assistant entry; tool and
//     artifact spans are hidden from display text
//  2. A second send while one is in flight is a no-op (Busy)
//  3. Cancel aborts the transfer and releases the guard
//  4. Warning after silence, cleared by the next event
//  5. Hard deadline expiry raises exactly one timeout error
//  6. Incomplete artifacts soften the warning and extend the deadline once
//  7. Tool-use records are deduplicated within a request
//  8. Server error events are classified; retry replays the message
//  9. Missing API key refuses to send and is recorded as the last error
// 10. HTTP status failures are classified; the transcript shows a friendly message
// 11. Artifacts persist across requests until cleared
// 12. Context telemetry from stream and polling endpoint

use super::*;
use crate::context::ContextLevel;
use crate::error::HttpErrorKind;
use crate::transport::{ChatResponse, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// What the transport returns for one `open` call.
enum Script {
    Lines(Vec<&'static str>),
    Channel(mpsc::Receiver<Bytes>),
    Fail(TransportError),
}

/// Replays scripted responses in order and records requests.
#[derive(Default)]
struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    context: Mutex<Option<ContextUsage>>,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(&self, request: ChatRequest) -> Result<ChatResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted response left");

        let body: crate::transport::ByteStream = match script {
            Script::Lines(lines) => {
                let chunks: Vec<Result<Bytes, TransportError>> = lines
                    .into_iter()
                    .map(|l| Ok(Bytes::from(format!("{l}\n"))))
                    .collect();
                Box::pin(tokio_stream::iter(chunks))
            }
            Script::Channel(rx) => Box::pin(ReceiverStream::new(rx).map(Ok::<Bytes, TransportError>)),
            Script::Fail(err) => return Err(err),
        };
        Ok(ChatResponse { status: 200, body })
    }

    async fn context_status(&self, _session_id: &str) -> Result<ContextUsage, TransportError> {
        self.context
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::Status {
                status: 404,
                message: "no context".to_string(),
            })
    }

    async fn validate_key(&self, api_key: &str) -> Result<KeyValidation, TransportError> {
        let valid = api_key.starts_with("sk-");
        Ok(KeyValidation {
            valid,
            tools_count: valid.then_some(3),
            error: (!valid).then(|| "invalid key format".to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Rendered {
    User(String),
    Text(String),
    Artifacts(Vec<String>),
    Warning { soft: bool },
    WarningCleared,
    Extended(Duration),
    Context(Option<f64>),
    Cancelled,
    Failed { kind: &'static str, retryable: bool },
}

#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<Rendered>>,
}

impl RecordingRenderer {
    fn calls(&self) -> Vec<Rendered> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Rendered) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn push(&self, call: Rendered) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Renderer for RecordingRenderer {
    fn user_message(&self, entry: &TranscriptEntry) {
        self.push(Rendered::User(entry.content.clone()));
    }
    fn assistant_text(&self, text: &str) {
        self.push(Rendered::Text(text.to_string()));
    }
    fn artifacts_changed(&self, cards: &[ArtifactCard]) {
        self.push(Rendered::Artifacts(cards.iter().map(|c| c.id.clone()).collect()));
    }
    fn timeout_warning(&self, soft: bool) {
        self.push(Rendered::Warning { soft });
    }
    fn timeout_warning_cleared(&self) {
        self.push(Rendered::WarningCleared);
    }
    fn timeout_extended(&self, grace: Duration) {
        self.push(Rendered::Extended(grace));
    }
    fn context_changed(&self, telemetry: &ContextTelemetry) {
        self.push(Rendered::Context(telemetry.percentage));
    }
    fn request_cancelled(&self) {
        self.push(Rendered::Cancelled);
    }
    fn request_failed(&self, error: &ChatError, retryable: bool) {
        self.push(Rendered::Failed {
            kind: error.kind_label(),
            retryable,
        });
    }
}

struct Harness {
    controller: Arc<SessionController>,
    transport: Arc<ScriptedTransport>,
    renderer: Arc<RecordingRenderer>,
}

fn harness_with(scripts: Vec<Script>, options: SessionOptions) -> Harness {
    let transport = Arc::new(ScriptedTransport::new(scripts));
    let renderer = Arc::new(RecordingRenderer::default());
    let controller = Arc::new(SessionController::new(
        transport.clone(),
        renderer.clone(),
        options,
    ));
    Harness {
        controller,
        transport,
        renderer,
    }
}

fn harness(scripts: Vec<Script>) -> Harness {
    harness_with(scripts, SessionOptions::default())
}

fn channel_script() -> (mpsc::Sender<Bytes>, Script) {
    let (tx, rx) = mpsc::channel(16);
    (tx, Script::Channel(rx))
}

fn line(text: &str) -> Bytes {
    Bytes::from(format!("{text}\n"))
}

/// Let spawned tasks run until they block.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn completed(outcome: Result<SendOutcome, ChatError>) -> ResponseSummary {
    match outcome {
        Ok(SendOutcome::Completed(summary)) => summary,
        other => panic!("expected completion, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test 1: text accumulation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn text_deltas_accumulate_into_one_assistant_entry() {
    let h = harness(vec![Script::Lines(vec![
        r#"data: {"type":"text","content":"A"}"#,
        r#"data: {"type":"text","content":"B"}"#,
        r#"data: {"type":"complete"}"#,
    ])]);

    let summary = completed(h.controller.send("hello").await);

    assert_eq!(summary.text, "AB");
    assert_eq!(summary.ended_by, EndReason::CompleteEvent);
    assert_eq!(h.controller.accumulated_text(), "AB");

    let transcript = h.controller.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[1].role, Role::Assistant);
    assert_eq!(transcript[1].content, "AB");

    assert_eq!(
        h.renderer.calls(),
        vec![
            Rendered::User("hello".to_string()),
            Rendered::Text("A".to_string()),
            Rendered::Text("AB".to_string()),
        ]
    );

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "hello");
    assert_eq!(requests[0].session_id, h.controller.session_id());
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn end_of_body_without_complete_event_finishes() {
    let h = harness(vec![Script::Lines(vec![r#"data: {"type":"text","content":"done"}"#])]);
    let summary = completed(h.controller.send("hi").await);
    assert_eq!(summary.ended_by, EndReason::EndOfStream);
}

#[tokio::test]
async fn inline_tool_span_is_hidden_from_display_text() {
    let h = harness(vec![Script::Lines(vec![
        r#"data: {"type":"text","content":"Let me look. TOOL_USE_START{\"tool_id\":\"t7\"}"}"#,
        r#"data: {"type":"text","content":"TOOL_USE_END Found it."}"#,
    ])]);

    let summary = completed(h.controller.send("search").await);

    assert_eq!(summary.text, "Let me look.  Found it.");
    assert!(h.controller.accumulated_text().contains("TOOL_USE_START"));
}

#[tokio::test]
async fn artifact_span_split_across_deltas_is_collapsed() {
    let h = harness(vec![Script::Lines(vec![
        r#"data: {"type":"text","content":"Here: <artifact type=\"html\"><p>x"}"#,
        r#"data: {"type":"text","content":"</p></artifact> done"}"#,
    ])]);

    let summary = completed(h.controller.send("page please").await);

    assert_eq!(summary.text, "Here: [artifact: see side panel] done");
    assert_eq!(
        h.controller.transcript()[1].content,
        "Here: [artifact: see side panel] done"
    );
    assert_eq!(
        h.controller.display_text(),
        "Here: [artifact: see side panel] done"
    );
    assert!(h.controller.accumulated_text().contains("</artifact>"));
}

#[tokio::test]
async fn blank_message_is_not_sent() {
    let h = harness(vec![]);
    assert_eq!(h.controller.send("   ").await, Ok(SendOutcome::Empty));
    assert!(h.transport.requests().is_empty());
}

// ---------------------------------------------------------------------------
// Test 2 & 3: busy guard and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_send_while_in_flight_is_busy_and_cancel_releases() {
    let (tx, script) = channel_script();
    let h = harness(vec![script]);

    let controller = h.controller.clone();
    let first = tokio::spawn(async move { controller.send("first").await });
    settle().await;
    assert!(h.controller.is_busy());

    assert_eq!(h.controller.send("second").await, Ok(SendOutcome::Busy));
    assert_eq!(h.transport.requests().len(), 1);

    assert!(h.controller.cancel());
    assert_eq!(first.await.unwrap(), Ok(SendOutcome::Cancelled));
    assert!(!h.controller.is_busy());
    assert!(!h.controller.cancel(), "nothing left to cancel");
    assert_eq!(h.renderer.count(|c| *c == Rendered::Cancelled), 1);
    assert_eq!(h.controller.last_error(), Some(ChatError::Aborted));
    assert!(!h.controller.transcript().iter().any(|e| e.is_error));
    assert_eq!(h.controller.retry().await, Ok(SendOutcome::Empty));
    drop(tx);
}

// ---------------------------------------------------------------------------
// Test 4: warning and clear
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silence_warns_then_activity_clears_warning() {
    let (tx, script) = channel_script();
    let h = harness(vec![script]);

    let controller = h.controller.clone();
    let task = tokio::spawn(async move { controller.send("slow one").await });
    settle().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    settle().await;
    assert_eq!(
        h.renderer.count(|c| *c == Rendered::Warning { soft: false }),
        1
    );

    tx.send(line(r#"data: {"type":"text","content":"finally"}"#))
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.renderer.count(|c| *c == Rendered::WarningCleared), 1);

    drop(tx);
    let summary = completed(task.await.unwrap());
    assert_eq!(summary.text, "finally");
    assert!(!summary.warning_fired, "cleared warning is not reported");
}

// ---------------------------------------------------------------------------
// Test 5: hard expiry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silence_past_hard_deadline_raises_one_timeout() {
    let (tx, script) = channel_script();
    let h = harness(vec![script]);

    let started = Instant::now();
    let result = h.controller.send("anyone there?").await;

    assert!(matches!(result, Err(ChatError::Timeout(_))), "{result:?}");
    assert!(started.elapsed() >= Duration::from_secs(120));
    assert!(started.elapsed() < Duration::from_secs(121));
    assert_eq!(h.renderer.count(|c| matches!(c, Rendered::Warning { .. })), 1);
    assert_eq!(
        h.renderer.count(|c| matches!(c, Rendered::Failed { kind: "timeout", retryable: true })),
        1
    );
    assert!(!h.controller.is_busy());

    let last = h.controller.transcript().pop().unwrap();
    assert!(last.is_error);
    assert!(last.content.starts_with("Sorry, I encountered an error:"));
    drop(tx);
}

// ---------------------------------------------------------------------------
// Test 6: artifact grace
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn incomplete_artifacts_extend_hard_deadline_once() {
    let (tx, script) = channel_script();
    tx.send(line(
        r#"data: {"type":"artifacts_update","content":[{"id":"a1","type":"html","complete":false}]}"#,
    ))
    .await
    .unwrap();
    let h = harness(vec![script]);

    let started = Instant::now();
    let result = h.controller.send("build me a page").await;

    assert!(matches!(result, Err(ChatError::Timeout(_))), "{result:?}");
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert_eq!(h.renderer.count(|c| *c == Rendered::Warning { soft: true }), 1);
    assert_eq!(
        h.renderer.count(|c| *c == Rendered::Extended(Duration::from_secs(180))),
        1
    );
    drop(tx);
}

// ---------------------------------------------------------------------------
// Test 7: tool-use dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_tool_span_is_recorded_once() {
    let h = harness(vec![
        Script::Lines(vec![
            "TOOL_USE_START",
            r#"{"tool_id":"t1","name":"search"}"#,
            "TOOL_USE_END",
            "TOOL_USE_START",
            r#"{"tool_id":"t1","name":"search"}"#,
            "TOOL_USE_END",
            r#"data: {"type":"text","content":"Result."}"#,
        ]),
        Script::Lines(vec![r#"data: {"type":"text","content":"Again."}"#]),
    ]);

    let summary = completed(h.controller.send("look it up").await);
    assert_eq!(summary.tool_uses, 1);
    assert_eq!(
        h.controller.processed_tool_ids(),
        HashSet::from(["t1".to_string()])
    );
    assert_eq!(summary.text, "Result.");

    // A new request starts with empty dedup memory.
    completed(h.controller.send("again").await);
    assert!(h.controller.processed_tool_ids().is_empty());
}

// ---------------------------------------------------------------------------
// Test 8: server error events and retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_event_is_classified_and_retry_replays() {
    let h = harness(vec![
        Script::Lines(vec![
            r#"data: {"type":"text","content":"Partial"}"#,
            r#"data: {"type":"rate_limit_error","content":"slow down"}"#,
            r#"data: {"type":"text","content":"never applied"}"#,
        ]),
        Script::Lines(vec![r#"data: {"type":"text","content":"Recovered"}"#]),
    ]);

    let err = h.controller.send("question").await.unwrap_err();
    assert_eq!(err, ChatError::RateLimit("slow down".to_string()));
    assert_eq!(h.controller.accumulated_text(), "Partial");
    assert_eq!(h.controller.last_error(), Some(err));
    assert!(!h.controller.is_busy());

    let summary = completed(h.controller.retry().await);
    assert_eq!(summary.text, "Recovered");

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].message, "question");

    // Nothing left to retry after success.
    assert_eq!(h.controller.retry().await, Ok(SendOutcome::Empty));
}

#[tokio::test]
async fn each_error_event_maps_to_its_kind() {
    let cases: Vec<(&'static str, &'static str)> = vec![
        (r#"data: {"type":"error","content":"boom"}"#, "generic"),
        (r#"data: {"type":"timeout_error","content":"upstream"}"#, "timeout"),
        (r#"data: {"type":"connection_error"}"#, "connection"),
        (r#"data: {"type":"stream_error","message":"cut"}"#, "stream"),
    ];

    for (line, kind) in cases {
        let h = harness(vec![Script::Lines(vec![line])]);
        let err = h.controller.send("x").await.unwrap_err();
        assert_eq!(err.kind_label(), kind, "for {line}");
    }
}

// ---------------------------------------------------------------------------
// Test 9: API key requirement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_api_key_refuses_to_send() {
    let options = SessionOptions {
        require_api_key: true,
        ..SessionOptions::default()
    };
    let h = harness_with(
        vec![Script::Lines(vec![r#"data: {"type":"complete"}"#])],
        options,
    );

    assert_eq!(h.controller.send("hi").await, Err(ChatError::MissingApiKey));
    assert!(h.transport.requests().is_empty());
    assert!(!h.controller.is_busy());
    assert_eq!(h.controller.last_error(), Some(ChatError::MissingApiKey));
    assert_eq!(
        h.renderer.calls(),
        vec![Rendered::Failed {
            kind: ChatError::MissingApiKey.kind_label(),
            retryable: false,
        }]
    );
    assert_eq!(h.controller.retry().await, Ok(SendOutcome::Empty));
    assert!(h.transport.requests().is_empty());

    let validation = h.controller.validate_api_key("not-a-key").await.unwrap();
    assert!(!validation.valid);
    assert!(!h.controller.has_api_key());

    let validation = h.controller.validate_api_key("sk-good").await.unwrap();
    assert_eq!(validation.tools_count, Some(3));
    assert!(h.controller.has_api_key());

    completed(h.controller.send("hi").await);
    assert_eq!(
        h.transport.requests()[0].api_key.as_deref(),
        Some("sk-good")
    );
}

// ---------------------------------------------------------------------------
// Test 10: HTTP status failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_status_failure_is_classified() {
    let h = harness(vec![Script::Fail(TransportError::Status {
        status: 503,
        message: "maintenance".to_string(),
    })]);

    let err = h.controller.send("hi").await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::Http {
            status: 503,
            kind: HttpErrorKind::ServiceUnavailable,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn failure_entry_uses_friendly_message() {
    let h = harness(vec![Script::Fail(TransportError::Status {
        status: 429,
        message: "slow down".to_string(),
    })]);

    h.controller.send("hi").await.unwrap_err();

    let last = h.controller.transcript().pop().unwrap();
    assert!(last.is_error);
    assert_eq!(
        last.content,
        "Sorry, I encountered an error: Too many requests. Please wait a moment before trying again."
    );
    assert!(!last.content.contains("429"));
}

// ---------------------------------------------------------------------------
// Test 11: artifacts across requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn artifacts_persist_across_requests_until_cleared() {
    let h = harness(vec![
        Script::Lines(vec![
            r#"data: {"type":"artifacts_update","content":[{"id":"a1","type":"html","title":"Page","complete":false}]}"#,
            r#"data: {"type":"artifacts_update","content":[{"id":"a1","complete":true,"permalink":"/x"}]}"#,
        ]),
        Script::Lines(vec![
            r#"data: {"type":"artifact","content":{"type":"code","content":"x = 1"}}"#,
            r#"data: {"type":"artifacts_remove","content":[{"id":"missing"}]}"#,
        ]),
    ]);

    completed(h.controller.send("make a page").await);
    let record = h
        .controller
        .with_state(|s| s.artifacts.get("a1").cloned())
        .unwrap();
    assert!(record.complete);
    assert_eq!(record.permalink.as_deref(), Some("/x"));
    assert_eq!(record.title(), "Page");

    completed(h.controller.send("and some code").await);
    let cards = h.controller.artifact_cards();
    assert_eq!(cards.len(), 2);
    assert!(cards[0].id.starts_with("legacy_"));
    assert_eq!(cards[1].id, "a1");
    assert!(cards[1].collapsed);

    assert_eq!(h.controller.toggle_artifact("a1"), Some(false));
    assert!(!h.controller.artifact_cards()[1].collapsed);

    h.controller.clear_artifacts();
    assert!(h.controller.artifact_cards().is_empty());
    assert_eq!(h.renderer.calls().last(), Some(&Rendered::Artifacts(vec![])));
}

// ---------------------------------------------------------------------------
// Test 12: context telemetry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn context_telemetry_from_stream_and_poll() {
    let h = harness(vec![Script::Lines(vec![
        r#"data: {"type":"context_percentage","percentage":72.0}"#,
        r#"data: {"type":"context_status","content":"Context 72% used"}"#,
    ])]);

    completed(h.controller.send("hi").await);
    let context = h.controller.context();
    assert_eq!(context.percentage, Some(72.0));
    assert_eq!(context.level(), ContextLevel::Caution);
    assert_eq!(context.status_text.as_deref(), Some("Context 72% used"));

    *h.transport.context.lock().unwrap() = Some(ContextUsage {
        usage_percentage: 91.0,
        status: "critical".to_string(),
        tokens_used: 182_000,
        tokens_remaining: 18_000,
        message_count: 40,
    });
    let usage = h.controller.poll_context().await.unwrap();
    assert_eq!(usage.level(), ContextLevel::Critical);
    assert_eq!(h.controller.context().percentage, Some(91.0));
    assert_eq!(h.renderer.calls().last(), Some(&Rendered::Context(Some(91.0))));
}

#[test]
fn session_ids_are_unique_and_prefixed() {
    let a = generate_session_id();
    let b = generate_session_id();
    assert_ne!(a, b);
    assert!(a.starts_with("session_"));
    assert_eq!(a.split('_').count(), 3);
}
