//! AssetMapper: decide the fate of existing narration audio.
//!
//! Audio stays valid only while the text it narrates is unchanged. Exactly one
//! [`AssetDecision`] is produced per old article that carries a narration URL.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use statutesync_shared::{Article, AssetAction, AssetDecision};

use crate::reconcile::ReconciliationResult;

enum Status {
    Unchanged(u32),
    Modified,
    Removed,
}

/// Map every audio-bearing article of `old` to keep, regenerate, or delete.
///
/// Decisions follow `old` order. An old number that somehow appears in none
/// of the reconciliation lists is treated as removed so no asset goes
/// unaccounted for.
pub fn map_assets(old: &[Article], reconciliation: &ReconciliationResult) -> Vec<AssetDecision> {
    let mut status: HashMap<&str, Status> = HashMap::new();
    for article in &reconciliation.unchanged {
        status.insert(article.number.as_str(), Status::Unchanged(article.order));
    }
    for modified in &reconciliation.modified {
        status.insert(modified.number.as_str(), Status::Modified);
    }
    for article in &reconciliation.removed {
        status.insert(article.number.as_str(), Status::Removed);
    }

    let mut decided: HashSet<&str> = HashSet::new();
    let mut decisions = Vec::new();

    for article in old {
        let Some(url) = article.narration() else {
            continue;
        };
        if !decided.insert(article.number.as_str()) {
            warn!(number = %article.number, "duplicate audio-bearing article ignored");
            continue;
        }

        let decision = match status.get(article.number.as_str()) {
            Some(Status::Unchanged(order)) => AssetDecision::keep(&article.number, url, *order),
            Some(Status::Modified) => AssetDecision::regenerate(&article.number, url),
            Some(Status::Removed) => AssetDecision::delete(&article.number, url, "article removed"),
            None => {
                warn!(
                    number = %article.number,
                    "audio-bearing article missing from reconciliation"
                );
                AssetDecision::delete(&article.number, url, "article missing from reconciliation")
            }
        };
        debug!(number = %decision.article_number, action = %decision.action, "asset decision");
        decisions.push(decision);
    }

    decisions
}

/// Decision counts per action: `(keep, regenerate, delete)`.
pub fn tally(decisions: &[AssetDecision]) -> (usize, usize, usize) {
    decisions
        .iter()
        .fold((0, 0, 0), |(k, r, d), decision| match decision.action {
            AssetAction::Keep => (k + 1, r, d),
            AssetAction::Regenerate => (k, r + 1, d),
            AssetAction::Delete => (k, r, d + 1),
        })
}
