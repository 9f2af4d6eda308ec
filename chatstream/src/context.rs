// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Context window telemetry
//
// The server reports how full the model's context window is, either as
// stream events (`context_status`, `context_percentage`) or through the
// polling endpoint. This module classifies usage into advisory levels.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

pub const CAUTION_PERCENT: f64 = 70.0;
pub const WARNING_PERCENT: f64 = 80.0;
pub const CRITICAL_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextLevel {
    Normal,
    Caution,
    Warning,
    Critical,
}

impl ContextLevel {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= CRITICAL_PERCENT {
            ContextLevel::Critical
        } else if percentage >= WARNING_PERCENT {
            ContextLevel::Warning
        } else if percentage >= CAUTION_PERCENT {
            ContextLevel::Caution
        } else {
            ContextLevel::Normal
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "normal" => Some(ContextLevel::Normal),
            "caution" => Some(ContextLevel::Caution),
            "warning" => Some(ContextLevel::Warning),
            "critical" => Some(ContextLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContextLevel::Normal => "normal",
            ContextLevel::Caution => "caution",
            ContextLevel::Warning => "warning",
            ContextLevel::Critical => "critical",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Polling endpoint response
// ---------------------------------------------------------------------------

/// Body of the context polling endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUsage {
    pub usage_percentage: f64,
    /// Server-side label; recomputed from the percentage when absent or unknown.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tokens_used: u64,
    /// May go negative once the window is overrun.
    #[serde(default)]
    pub tokens_remaining: i64,
    #[serde(default)]
    pub message_count: u32,
}

impl ContextUsage {
    pub fn level(&self) -> ContextLevel {
        ContextLevel::from_label(&self.status)
            .unwrap_or_else(|| ContextLevel::from_percentage(self.usage_percentage))
    }

    /// Advisory line for the user, `None` while usage is normal.
    pub fn status_message(&self) -> Option<String> {
        let usage = self.usage_percentage;
        match self.level() {
            ContextLevel::Critical => Some(format!(
                "Context window {usage:.1}% full. Older messages are being summarized to keep the conversation going."
            )),
            ContextLevel::Warning => Some(format!(
                "Context usage at {usage:.1}%. Starting to optimize conversation history."
            )),
            ContextLevel::Caution => Some(format!(
                "Context {usage:.1}% used (~{} tokens remaining).",
                group_thousands(self.tokens_remaining)
            )),
            ContextLevel::Normal => None,
        }
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

// ---------------------------------------------------------------------------
// Telemetry received on the stream
// ---------------------------------------------------------------------------

/// Latest context telemetry seen during a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextTelemetry {
    pub percentage: Option<f64>,
    pub status_text: Option<String>,
}

impl ContextTelemetry {
    pub fn level(&self) -> ContextLevel {
        self.percentage
            .map(ContextLevel::from_percentage)
            .unwrap_or(ContextLevel::Normal)
    }

    pub fn record_percentage(&mut self, percentage: f64) {
        self.percentage = Some(percentage.clamp(0.0, 100.0));
    }

    pub fn record_status(&mut self, text: impl Into<String>) {
        self.status_text = Some(text.into());
    }

    /// Overwrite with a polled snapshot.
    pub fn record_usage(&mut self, usage: &ContextUsage) {
        self.record_percentage(usage.usage_percentage);
        self.status_text = usage.status_message();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(percentage: f64, status: &str, remaining: i64) -> ContextUsage {
        ContextUsage {
            usage_percentage: percentage,
            status: status.to_string(),
            tokens_used: 1000,
            tokens_remaining: remaining,
            message_count: 4,
        }
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert_eq!(ContextLevel::from_percentage(69.9), ContextLevel::Normal);
        assert_eq!(ContextLevel::from_percentage(70.0), ContextLevel::Caution);
        assert_eq!(ContextLevel::from_percentage(80.0), ContextLevel::Warning);
        assert_eq!(ContextLevel::from_percentage(90.0), ContextLevel::Critical);
        assert_eq!(ContextLevel::from_percentage(100.0), ContextLevel::Critical);
    }

    #[test]
    fn server_status_label_wins_over_percentage() {
        assert_eq!(usage(10.0, "critical", 0).level(), ContextLevel::Critical);
        assert_eq!(usage(85.0, "", 0).level(), ContextLevel::Warning);
        assert_eq!(usage(75.0, "unheard-of", 0).level(), ContextLevel::Caution);
    }

    #[test]
    fn status_messages_match_level() {
        assert_eq!(usage(12.0, "normal", 170_000).status_message(), None);

        let caution = usage(72.5, "caution", 55_000).status_message().unwrap();
        assert_eq!(caution, "Context 72.5% used (~55,000 tokens remaining).");

        let warning = usage(81.0, "warning", 38_000).status_message().unwrap();
        assert!(warning.starts_with("Context usage at 81.0%"));

        let critical = usage(93.2, "critical", 13_600).status_message().unwrap();
        assert!(critical.starts_with("Context window 93.2% full"));
    }

    #[test]
    fn polling_body_deserializes() {
        let body = r#"{"usage_percentage":45.3,"status":"normal","tokens_used":90600,"tokens_remaining":109400,"message_count":12}"#;
        let parsed: ContextUsage = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.tokens_used, 90_600);
        assert_eq!(parsed.message_count, 12);
        assert_eq!(parsed.level(), ContextLevel::Normal);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(group_thousands(-4_500), "-4,500");
    }

    #[test]
    fn telemetry_clamps_percentage() {
        let mut telemetry = ContextTelemetry::default();
        telemetry.record_percentage(140.0);
        assert_eq!(telemetry.percentage, Some(100.0));
        assert_eq!(telemetry.level(), ContextLevel::Critical);
    }
}
