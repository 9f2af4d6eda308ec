// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Render data
//
// Pure functions from immutable view state to plain data a front end can
// draw: artifact cards for the side panel and transcript entries for the
// conversation. Nothing here produces markup beyond escaping HTML for an
// isolated `srcdoc` frame; markdown is handed over as source.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::artifact::{Artifact, ArtifactKind, ArtifactReconciler};

const DEFAULT_CODE_LANGUAGE: &str = "text";

// ---------------------------------------------------------------------------
// Artifact cards
// ---------------------------------------------------------------------------

/// How an artifact's content should be presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactBody {
    /// HTML escaped for an isolated frame's `srcdoc` attribute.
    Html { srcdoc: String },
    /// Markdown source for an external renderer.
    Markdown { source: String },
    Code { source: String, language: String },
    /// Preformatted text; also used for HAML and unknown kinds.
    Text { text: String },
}

impl ArtifactBody {
    pub fn for_artifact(artifact: &Artifact) -> Self {
        match artifact.kind {
            ArtifactKind::Html => ArtifactBody::Html {
                srcdoc: escape_html(&artifact.content),
            },
            ArtifactKind::Markdown => ArtifactBody::Markdown {
                source: artifact.content.clone(),
            },
            ArtifactKind::Code => ArtifactBody::Code {
                source: artifact.content.clone(),
                language: artifact
                    .language
                    .clone()
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string()),
            },
            _ => ArtifactBody::Text {
                text: artifact.content.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCard {
    pub id: String,
    pub title: String,
    pub type_label: String,
    /// Shown while the producer is still building the artifact.
    pub building: bool,
    /// Every card but the newest can be collapsed.
    pub collapsible: bool,
    pub collapsed: bool,
    pub permalink: Option<String>,
    pub body: ArtifactBody,
}

/// User overrides of the default collapsed state, keyed by artifact id.
#[derive(Debug, Clone, Default)]
pub struct ArtifactViewState {
    overrides: HashMap<String, bool>,
}

impl ArtifactViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the collapsed state of a card. Returns the new state, or `None`
    /// when the id is unknown or names the newest (always expanded) card.
    pub fn toggle(&mut self, artifacts: &ArtifactReconciler, id: &str) -> Option<bool> {
        let entry = artifacts
            .display_order()
            .into_iter()
            .find(|e| e.artifact.id == id)?;
        if entry.newest {
            return None;
        }

        let current = self
            .overrides
            .get(id)
            .copied()
            .unwrap_or(entry.collapsed_by_default);
        let next = !current;
        self.overrides.insert(id.to_string(), next);
        Some(next)
    }

    /// Drop overrides for artifacts that no longer exist.
    pub fn retain_existing(&mut self, artifacts: &ArtifactReconciler) {
        self.overrides.retain(|id, _| artifacts.get(id).is_some());
    }

    pub fn clear(&mut self) {
        self.overrides.clear();
    }

    fn collapsed(&self, id: &str, default: bool) -> bool {
        self.overrides.get(id).copied().unwrap_or(default)
    }
}

/// Cards in display order, newest first.
pub fn build_cards(artifacts: &ArtifactReconciler, view: &ArtifactViewState) -> Vec<ArtifactCard> {
    artifacts
        .display_order()
        .into_iter()
        .map(|entry| {
            let artifact = entry.artifact;
            let collapsed = !entry.newest && view.collapsed(&artifact.id, entry.collapsed_by_default);
            ArtifactCard {
                id: artifact.id.clone(),
                title: artifact.title().to_string(),
                type_label: artifact.kind.label(),
                building: !artifact.complete,
                collapsible: !entry.newest,
                collapsed,
                permalink: artifact.permalink.clone(),
                body: ArtifactBody::for_artifact(artifact),
            }
        })
        .collect()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn sender_label(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the entry reports a failed request.
    pub is_error: bool,
}

impl TranscriptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Hour and minute, as shown next to the sender.
    pub fn display_time(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactPatch;

    fn patch(json: &str) -> ArtifactPatch {
        serde_json::from_str(json).unwrap()
    }

    fn three_artifacts() -> ArtifactReconciler {
        let mut artifacts = ArtifactReconciler::new();
        artifacts.apply_updates(vec![
            patch(r#"{"id":"page","type":"html","title":"Landing","content":"<h1 class=\"x\">Hi & bye</h1>"}"#),
            patch(r##"{"id":"draft","type":"markdown","content":"# Draft","complete":false}"##),
            patch(r#"{"id":"snippet","type":"code","content":"print(1)"}"#),
        ]);
        artifacts
    }

    #[test]
    fn cards_follow_display_rules() {
        let cards = build_cards(&three_artifacts(), &ArtifactViewState::new());
        let ids: Vec<_> = cards.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["snippet", "draft", "page"]);

        assert!(!cards[0].collapsible);
        assert!(!cards[0].collapsed);
        assert!(cards[1].building);
        assert!(!cards[1].collapsed);
        assert!(cards[2].collapsed);
        assert_eq!(cards[1].title, "Untitled");
        assert_eq!(cards[2].type_label, "HTML");
    }

    #[test]
    fn bodies_match_kind() {
        let cards = build_cards(&three_artifacts(), &ArtifactViewState::new());
        assert_eq!(
            cards[0].body,
            ArtifactBody::Code {
                source: "print(1)".to_string(),
                language: "text".to_string(),
            }
        );
        assert_eq!(
            cards[1].body,
            ArtifactBody::Markdown {
                source: "# Draft".to_string()
            }
        );
        assert_eq!(
            cards[2].body,
            ArtifactBody::Html {
                srcdoc: "&lt;h1 class=&quot;x&quot;&gt;Hi &amp; bye&lt;/h1&gt;".to_string()
            }
        );
    }

    #[test]
    fn toggle_overrides_default_and_ignores_newest() {
        let artifacts = three_artifacts();
        let mut view = ArtifactViewState::new();

        assert_eq!(view.toggle(&artifacts, "snippet"), None);
        assert_eq!(view.toggle(&artifacts, "missing"), None);
        assert_eq!(view.toggle(&artifacts, "page"), Some(false));
        assert_eq!(view.toggle(&artifacts, "draft"), Some(true));

        let cards = build_cards(&artifacts, &view);
        assert!(!cards[2].collapsed);
        assert!(cards[1].collapsed);

        assert_eq!(view.toggle(&artifacts, "page"), Some(true));
    }

    #[test]
    fn removed_artifact_loses_override() {
        let mut artifacts = three_artifacts();
        let mut view = ArtifactViewState::new();
        view.toggle(&artifacts, "page");

        artifacts.apply_removals(&["page".to_string()]);
        view.retain_existing(&artifacts);
        artifacts.apply_updates(vec![patch(r#"{"id":"page","type":"html"}"#)]);
        artifacts.apply_updates(vec![patch(r#"{"id":"newer"}"#)]);

        // Re-added "page" is back to its default collapsed state.
        let cards = build_cards(&artifacts, &view);
        let page = cards.iter().find(|c| c.id == "page").unwrap();
        assert!(page.collapsed);
    }

    #[test]
    fn haml_and_unknown_kinds_render_as_text() {
        let mut artifacts = ArtifactReconciler::new();
        artifacts.apply_updates(vec![patch(r#"{"id":"h","type":"haml","content":"%p hi"}"#)]);
        let cards = build_cards(&artifacts, &ArtifactViewState::new());
        assert_eq!(
            cards[0].body,
            ArtifactBody::Text {
                text: "%p hi".to_string()
            }
        );
        assert_eq!(cards[0].type_label, "HAML");
    }

    #[test]
    fn transcript_entries_label_sender() {
        let user = TranscriptEntry::new(Role::User, "hello");
        let failure = TranscriptEntry::error("Sorry, I encountered an error: boom");
        assert_eq!(user.role.sender_label(), "You");
        assert_eq!(failure.role, Role::Assistant);
        assert!(failure.is_error);
        assert_eq!(user.display_time().len(), 5);
    }
}
