// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Artifact reconciliation
//
// Keeps the side-panel artifact collection consistent as partial updates
// stream in. Identity is the `id` field: a repeated id merges into the
// existing record (fields carried by the update win), an unseen id is
// appended. Storage order is insertion order; display order is computed
// on demand.

use chrono::Utc;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Artifact kind
// ---------------------------------------------------------------------------

/// Content type of an artifact. Unknown producer types are preserved
/// verbatim so they can still be labelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactKind {
    Html,
    Haml,
    Code,
    Markdown,
    Text,
    Other(String),
}

impl From<String> for ArtifactKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "html" => ArtifactKind::Html,
            "haml" => ArtifactKind::Haml,
            "code" => ArtifactKind::Code,
            "markdown" | "md" => ArtifactKind::Markdown,
            "text" => ArtifactKind::Text,
            _ => ArtifactKind::Other(value),
        }
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Html => "html".to_string(),
            ArtifactKind::Haml => "haml".to_string(),
            ArtifactKind::Code => "code".to_string(),
            ArtifactKind::Markdown => "markdown".to_string(),
            ArtifactKind::Text => "text".to_string(),
            ArtifactKind::Other(other) => other,
        }
    }
}

impl ArtifactKind {
    /// Human label shown next to the artifact title.
    pub fn label(&self) -> String {
        match self {
            ArtifactKind::Html => "HTML".to_string(),
            ArtifactKind::Haml => "HAML".to_string(),
            ArtifactKind::Code => "Code".to_string(),
            ArtifactKind::Markdown => "Markdown".to_string(),
            ArtifactKind::Text => "Text".to_string(),
            ArtifactKind::Other(other) => other.to_uppercase(),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact records
// ---------------------------------------------------------------------------

pub const UNTITLED: &str = "Untitled";

/// One rendered side-panel unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    /// `false` while the producer is still building the artifact.
    #[serde(default = "default_complete")]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Server-resolved URL, available once complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
}

fn default_complete() -> bool {
    true
}

impl Artifact {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED)
    }

    fn from_patch(id: String, patch: ArtifactPatch) -> Self {
        Self {
            id,
            kind: patch.kind.unwrap_or(ArtifactKind::Text),
            title: patch.title,
            content: patch.content.unwrap_or_default(),
            complete: patch.complete.unwrap_or(true),
            language: patch.language,
            permalink: patch.permalink,
        }
    }

    /// Shallow merge: every field the patch carries replaces ours.
    fn merge(&mut self, patch: ArtifactPatch) {
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(title) = patch.title {
            self.title = Some(title);
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(complete) = patch.complete {
            self.complete = complete;
        }
        if let Some(language) = patch.language {
            self.language = Some(language);
        }
        if let Some(permalink) = patch.permalink {
            self.permalink = Some(permalink);
        }
    }
}

/// A partial artifact as it arrives on the wire. Absent fields leave the
/// stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ArtifactKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
}

impl ArtifactPatch {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Display ordering
// ---------------------------------------------------------------------------

/// An artifact in display position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayEntry<'a> {
    pub artifact: &'a Artifact,
    /// First entry in display order.
    pub newest: bool,
    /// Default presentation before any user toggle.
    pub collapsed_by_default: bool,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Ordered artifact collection with id-keyed upserts.
///
/// Entries are only removed by an explicit removal or `clear()`.
#[derive(Debug, Default)]
pub struct ArtifactReconciler {
    items: Vec<Artifact>,
    fallback_counter: u64,
}

impl ArtifactReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert each patch by id. Returns the ids touched, in order.
    ///
    /// Applying the same list twice leaves the same state as applying it
    /// once, provided every patch carries an id.
    pub fn apply_updates(&mut self, updates: Vec<ArtifactPatch>) -> Vec<String> {
        updates
            .into_iter()
            .map(|patch| self.upsert(patch))
            .collect()
    }

    /// Add a record from the legacy singular event, assigning a fallback
    /// id when the producer sent none.
    pub fn add_legacy(&mut self, patch: ArtifactPatch) -> String {
        self.upsert(patch)
    }

    fn upsert(&mut self, mut patch: ArtifactPatch) -> String {
        let id = match patch.id.take() {
            Some(id) if !id.is_empty() => id,
            _ => self.fallback_id(),
        };

        match self.items.iter_mut().find(|a| a.id == id) {
            Some(existing) => {
                existing.merge(patch);
                tracing::debug!(artifact_id = %id, complete = existing.complete, "artifact updated");
            }
            None => {
                let artifact = Artifact::from_patch(id.clone(), patch);
                tracing::debug!(artifact_id = %id, complete = artifact.complete, "artifact added");
                self.items.push(artifact);
            }
        }
        id
    }

    /// Unique per reconciler: a monotonic counter plus the wall clock.
    fn fallback_id(&mut self) -> String {
        self.fallback_counter += 1;
        format!(
            "legacy_{}_{}",
            self.fallback_counter,
            Utc::now().timestamp_millis()
        )
    }

    /// Remove every artifact whose id is listed. Returns how many were removed.
    pub fn apply_removals(&mut self, ids: &[String]) -> usize {
        let before = self.items.len();
        self.items.retain(|a| !ids.contains(&a.id));
        before - self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.items.iter().find(|a| a.id == id)
    }

    /// Artifacts in insertion order.
    pub fn items(&self) -> &[Artifact] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when any artifact is still being built.
    pub fn has_incomplete(&self) -> bool {
        self.items.iter().any(|a| !a.complete)
    }

    /// Artifacts newest first. Only the newest is expanded by default;
    /// older complete artifacts are collapsed, older incomplete ones stay open.
    pub fn display_order(&self) -> Vec<DisplayEntry<'_>> {
        self.items
            .iter()
            .rev()
            .enumerate()
            .map(|(index, artifact)| {
                let newest = index == 0;
                DisplayEntry {
                    artifact,
                    newest,
                    collapsed_by_default: !newest && artifact.complete,
                }
            })
            .collect()
    }
}
