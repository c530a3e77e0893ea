//! Reconciler: classify every article number across two snapshots.
//!
//! Matching is by exact `number` only. A renumbered article shows up as one
//! removal plus one addition, never as a modification.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use statutesync_shared::{Article, ArticleKind};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// An article present in both snapshots whose normalized text differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedArticle {
    pub number: String,
    /// Order in the new snapshot.
    pub order: u32,
    pub kind: ArticleKind,
    pub old_content: String,
    pub new_content: String,
}

/// Four disjoint classifications of the union of article numbers.
///
/// `added`, `unchanged` and `modified` follow new-snapshot order and carry
/// new-snapshot `order`; `removed` follows old-snapshot order and keeps the
/// old `order` for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub added: Vec<Article>,
    pub removed: Vec<Article>,
    pub unchanged: Vec<Article>,
    pub modified: Vec<ModifiedArticle>,
}

/// Aggregate counts of a [`ReconciliationResult`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationCounts {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub modified: usize,
    /// Size of the union of both snapshots' numbers.
    pub total: usize,
}

impl ReconciliationResult {
    pub fn counts(&self) -> ReconciliationCounts {
        let added = self.added.len();
        let removed = self.removed.len();
        let unchanged = self.unchanged.len();
        let modified = self.modified.len();
        ReconciliationCounts {
            added,
            removed,
            unchanged,
            modified,
            total: added + removed + unchanged + modified,
        }
    }

    /// Whether the new snapshot differs from the old one at all.
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty())
    }

    pub fn find_modified(&self, number: &str) -> Option<&ModifiedArticle> {
        self.modified.iter().find(|m| m.number == number)
    }
}

impl fmt::Display for ReconciliationCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} removed, {} modified, {} unchanged ({} total)",
            self.added, self.removed, self.modified, self.unchanged, self.total
        )
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.counts(), f)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Classify `old` and `new` snapshots by article number.
///
/// If a number repeats inside one snapshot only its first occurrence
/// participates; the rest are logged and dropped so the partition stays exact.
pub fn reconcile(old: &[Article], new: &[Article]) -> ReconciliationResult {
    let old = first_occurrences(old, "old");
    let new = first_occurrences(new, "new");

    let old_by_number: HashMap<&str, &Article> =
        old.iter().map(|a| (a.number.as_str(), *a)).collect();
    let new_numbers: HashSet<&str> = new.iter().map(|a| a.number.as_str()).collect();

    let mut result = ReconciliationResult::default();

    for article in &new {
        match old_by_number.get(article.number.as_str()) {
            Some(prev) if prev.normalized_content() == article.normalized_content() => {
                result.unchanged.push((*article).clone());
            }
            Some(prev) => {
                result.modified.push(ModifiedArticle {
                    number: article.number.clone(),
                    order: article.order,
                    kind: article.kind,
                    old_content: prev.content.clone(),
                    new_content: article.content.clone(),
                });
            }
            None => {
                result.added.push((*article).clone());
            }
        }
    }

    for prev in &old {
        if !new_numbers.contains(prev.number.as_str()) {
            result.removed.push((*prev).clone());
        }
    }

    info!(summary = %result, "reconciliation complete");
    result
}

fn first_occurrences<'a>(articles: &'a [Article], side: &str) -> Vec<&'a Article> {
    let mut seen = HashSet::new();
    articles
        .iter()
        .filter(|a| {
            let first = seen.insert(a.number.as_str());
            if !first {
                warn!(
                    side,
                    number = %a.number,
                    order = a.order,
                    "duplicate article number ignored"
                );
            }
            first
        })
        .collect()
}
