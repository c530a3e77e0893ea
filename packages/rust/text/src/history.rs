//! HistoryExtractor: parenthetical amendment citations from raw statute text.
//!
//! Each citation is anchored to the nearest preceding structural reference
//! (article, paragraph, item, sub-item) found within a bounded lookback
//! window, grouped by its literal text, and dated.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use statutesync_shared::{HistoryConfig, HistoryEntry};

use crate::markers::MarkerTable;

/// Limits applied during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryOptions {
    pub lookback_chars: usize,
    pub min_citation_chars: usize,
    pub max_citation_chars: usize,
    pub max_anchors: usize,
    pub max_entries: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self::from(&HistoryConfig::default())
    }
}

impl From<&HistoryConfig> for HistoryOptions {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            lookback_chars: config.lookback_chars,
            min_citation_chars: config.min_citation_chars,
            max_citation_chars: config.max_citation_chars,
            max_anchors: config.max_anchors,
            max_entries: config.max_entries,
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]+)\)").expect("valid regex"));

// An act only counts when it is numbered (`Lei nº 9.000`, `Decreto 1234`).
// Amendment verbs count on their own.
static AMENDMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:Lei(?:\s+Complementar)?|Decreto(?:-Lei)?|Medida\s+Provisória|Emenda\s+Constitucional)",
        r"\s+(?:n[º°o.]*\s*)?\d[\d.\-/]*",
        r"|Incluíd[oa]|Redação\s+dada|Alterad|Revogad|Acrescid|Inserid|Modificad",
    ))
    .expect("valid regex")
});

static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"§\s*(\d+)\s*([º°])?").expect("valid regex"));

static SOLE_PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Parágrafo\s+único").expect("valid regex"));

static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([IVXLCDM]+)\s*[-–—]").expect("valid regex"));

static SUB_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([a-z])\)").expect("valid regex"));

static FULL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}\s*[./-]\s*\d{1,2}\s*[./-]\s*(\d{4})\b").expect("valid regex")
});

static DE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bde\s+(\d{4})\b").expect("valid regex"));

static FOUR_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})\b").expect("valid regex"));

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extracts [`HistoryEntry`] records from raw text.
#[derive(Debug, Clone, Default)]
pub struct HistoryExtractor {
    markers: MarkerTable,
    options: HistoryOptions,
}

struct Group {
    text: String,
    anchors: Vec<String>,
}

impl HistoryExtractor {
    pub fn new(markers: MarkerTable, options: HistoryOptions) -> Self {
        Self { markers, options }
    }

    /// Scan `raw` and return deduplicated entries, newest year first.
    pub fn extract(&self, raw: &str) -> Vec<HistoryEntry> {
        let mut groups: Vec<Group> = Vec::new();

        for caps in CITATION_RE.captures_iter(raw) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let text = inner.as_str().trim();
            if !self.is_citation(text) {
                continue;
            }

            let window = lookback(raw, whole.start(), self.options.lookback_chars);
            let anchor = self.anchor_in(window);
            debug!(citation = text, ?anchor, "amendment citation");

            let group = match groups.iter_mut().position(|g| g.text == text) {
                Some(i) => &mut groups[i],
                None => {
                    groups.push(Group {
                        text: text.to_string(),
                        anchors: Vec::new(),
                    });
                    let last = groups.len() - 1;
                    &mut groups[last]
                }
            };

            if let Some(anchor) = anchor {
                if group.anchors.len() < self.options.max_anchors
                    && !group.anchors.contains(&anchor)
                {
                    group.anchors.push(anchor);
                }
            }
        }

        let mut entries: Vec<HistoryEntry> = groups
            .into_iter()
            .map(|g| HistoryEntry {
                year: citation_year(&g.text),
                text: g.text,
                anchors: g.anchors,
            })
            .collect();

        // Stable: equal years keep first-seen order.
        entries.sort_by(|a, b| b.year.cmp(&a.year));
        entries.truncate(self.options.max_entries);
        entries
    }

    fn is_citation(&self, text: &str) -> bool {
        let len = text.chars().count();
        len >= self.options.min_citation_chars
            && len <= self.options.max_citation_chars
            && AMENDMENT_RE.is_match(text)
    }

    /// Nearest anchor in `window`: the last article reference, combined with
    /// the last finer reference when that one follows it.
    fn anchor_in(&self, window: &str) -> Option<String> {
        let article = self.markers.article_references(window).into_iter().last();
        let finer = finer_anchor(window);

        match (article, finer) {
            (Some((a_pos, art)), Some((f_pos, fine))) if f_pos > a_pos => {
                Some(format!("{art}, {fine}"))
            }
            (Some((_, art)), _) => Some(art),
            (None, Some((_, fine))) => Some(fine),
            (None, None) => None,
        }
    }
}

/// The last `max_chars` characters of `text` before byte offset `end`.
fn lookback(text: &str, end: usize, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    let head = &text[..end];
    let start = head
        .char_indices()
        .rev()
        .nth(max_chars - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &head[start..]
}

/// The last paragraph, item, or sub-item reference in `window`.
fn finer_anchor(window: &str) -> Option<(usize, String)> {
    let paragraph = PARAGRAPH_RE.captures_iter(window).last().and_then(|c| {
        let ordinal = if c.get(2).is_some() { "º" } else { "" };
        Some((c.get(0)?.start(), format!("§ {}{ordinal}", c.get(1)?.as_str())))
    });
    let sole = SOLE_PARAGRAPH_RE
        .find_iter(window)
        .last()
        .map(|m| (m.start(), "Parágrafo único".to_string()));
    let item = ITEM_RE
        .captures_iter(window)
        .last()
        .and_then(|c| Some((c.get(1)?.start(), c.get(1)?.as_str().to_string())));
    let sub_item = SUB_ITEM_RE
        .captures_iter(window)
        .last()
        .and_then(|c| Some((c.get(1)?.start(), format!("{})", c.get(1)?.as_str()))));

    [paragraph, sole, item, sub_item]
        .into_iter()
        .flatten()
        .max_by_key(|(pos, _)| *pos)
}

/// Year of a citation: a full date wins, then the last `de YYYY`, then the
/// last four-digit token. Only 1900..=2099 counts; otherwise `0`.
pub fn citation_year(citation: &str) -> u16 {
    let plausible = |caps: regex::Captures<'_>| -> Option<u16> {
        let year: u16 = caps.get(1)?.as_str().parse().ok()?;
        (1900..=2099).contains(&year).then_some(year)
    };

    FULL_DATE_RE
        .captures_iter(citation)
        .filter_map(plausible)
        .last()
        .or_else(|| DE_YEAR_RE.captures_iter(citation).filter_map(plausible).last())
        .or_else(|| {
            FOUR_DIGITS_RE
                .captures_iter(citation)
                .filter_map(plausible)
                .last()
        })
        .unwrap_or(0)
}
