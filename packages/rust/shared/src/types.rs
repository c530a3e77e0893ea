//! Core domain types for StatuteSync snapshots.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StatuteId
// ---------------------------------------------------------------------------

/// Identifier of one statute in the article store (e.g. `codigo-penal`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatuteId(pub String);

impl StatuteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StatuteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StatuteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// Whether a record is a numbered article or a structural header
/// (title/chapter/section) kept as a pseudo-article for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArticleKind {
    Article,
    StructuralHeader,
}

impl ArticleKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::StructuralHeader => "structural-header",
        }
    }

    /// Parse the storage representation.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "article" => Some(Self::Article),
            "structural-header" => Some(Self::StructuralHeader),
            _ => None,
        }
    }
}

/// One numbered unit of a statute within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Canonical identifier, unique within one snapshot (e.g. `Art. 121`, `TÍTULO I`).
    pub number: String,
    /// Full text body, including any preceding descriptive title.
    pub content: String,
    /// 1-based position within the snapshot.
    pub order: u32,
    #[serde(default = "default_kind")]
    pub kind: ArticleKind,
    /// Narration audio URL; only present on persisted snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_url: Option<String>,
}

fn default_kind() -> ArticleKind {
    ArticleKind::Article
}

impl Article {
    /// A freshly extracted article (no narration).
    pub fn new(
        number: impl Into<String>,
        content: impl Into<String>,
        order: u32,
        kind: ArticleKind,
    ) -> Self {
        Self {
            number: number.into(),
            content: content.into(),
            order,
            kind,
            narration_url: None,
        }
    }

    /// Attach an existing narration URL.
    pub fn with_narration(mut self, url: impl Into<String>) -> Self {
        self.narration_url = Some(url.into());
        self
    }

    /// The narration URL, if one is attached and non-blank.
    pub fn narration(&self) -> Option<&str> {
        self.narration_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    /// Content with incidental surrounding whitespace removed; the basis for
    /// textual equality between snapshots.
    pub fn normalized_content(&self) -> &str {
        self.content.trim()
    }

    /// SHA-256 hex digest of the normalized content.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_content().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// HistoryEntry
// ---------------------------------------------------------------------------

/// A historical amendment citation anchored to nearby structural references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Citation text without parentheses (e.g. `Redação dada pela Lei nº 13.105, de 2015`).
    pub text: String,
    /// Up to a handful of distinct nearby references, in discovery order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<String>,
    /// Year of the amendment, `0` when it could not be recovered.
    pub year: u16,
}

impl HistoryEntry {
    /// Display form: `"<anchors> → <citation>"`, or the bare citation.
    pub fn render(&self) -> String {
        if self.anchors.is_empty() {
            self.text.clone()
        } else {
            format!("{} → {}", self.anchors.join("; "), self.text)
        }
    }
}

// ---------------------------------------------------------------------------
// AssetDecision
// ---------------------------------------------------------------------------

/// What happens to an existing narration asset after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetAction {
    Keep,
    Regenerate,
    Delete,
}

impl AssetAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Regenerate => "regenerate",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for AssetAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fate of one audio-bearing old article's narration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDecision {
    pub article_number: String,
    pub action: AssetAction,
    /// Narration URL carried over to the new article; `keep` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Order of the matching new article; `keep` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_order: Option<u32>,
    /// The narration URL the old article carried.
    pub previous_url: String,
    pub reason: String,
}

impl AssetDecision {
    pub fn keep(number: impl Into<String>, url: impl Into<String>, new_order: u32) -> Self {
        let url = url.into();
        Self {
            article_number: number.into(),
            action: AssetAction::Keep,
            url: Some(url.clone()),
            new_order: Some(new_order),
            previous_url: url,
            reason: "text unchanged".into(),
        }
    }

    pub fn regenerate(number: impl Into<String>, previous_url: impl Into<String>) -> Self {
        Self::discard(number, AssetAction::Regenerate, previous_url, "underlying text changed")
    }

    pub fn delete(
        number: impl Into<String>,
        previous_url: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::discard(number, AssetAction::Delete, previous_url, reason)
    }

    fn discard(
        number: impl Into<String>,
        action: AssetAction,
        previous_url: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            article_number: number.into(),
            action,
            url: None,
            new_order: None,
            previous_url: previous_url.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order. `Snapshot` is the one-off read of the
/// persisted old snapshot at pipeline start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Snapshot,
    Fetch,
    Convert,
    Format,
    Validate,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Fetch => "fetch",
            Self::Convert => "convert",
            Self::Format => "format",
            Self::Validate => "validate",
            Self::Commit => "commit",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
