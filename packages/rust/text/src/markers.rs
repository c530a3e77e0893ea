//! Marker table: the document-convention vocabularies used by segmentation
//! and anchor detection, compiled once from [`SegmenterConfig`].

use regex::Regex;

use statutesync_shared::{Result, SegmenterConfig, StatuteSyncError};

/// A structural header recognised at the start of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    /// Keyword as spelled in the marker table (e.g. `CAPÍTULO`).
    pub keyword: String,
    /// Nesting level of the keyword (0 = outermost).
    pub level: u8,
    /// `"<KEYWORD> <designator>"`, e.g. `CAPÍTULO II`, or the bare keyword.
    pub designation: String,
}

/// Compiled marker vocabularies for one document convention.
#[derive(Debug, Clone)]
pub struct MarkerTable {
    article_line: Regex,
    article_anywhere: Regex,
    canonical_label: String,
    header_line: Regex,
    header_levels: Vec<(String, u8)>,
    continuation: Regex,
    title_max_chars: usize,
    title_max_words: usize,
}

impl MarkerTable {
    /// Compile a marker table from configuration.
    ///
    /// Fails only when a configured pattern is not a valid regex or the header
    /// vocabulary is empty.
    pub fn from_config(config: &SegmenterConfig) -> Result<Self> {
        let label = &config.article_label_pattern;
        // Numbers past 999 carry a dotted thousands separator (`Art. 1.025`).
        let number = r"(?P<num>\d{1,3}(?:\.\d{3})+|\d+)[º°]?(?P<suffix>-?[A-Z]\b)?";

        let article_line = compile(
            &format!(r"^\s*(?i:{label})\s*{number}"),
            "article_label_pattern",
        )?;
        let article_anywhere = compile(
            &format!(r"\b(?i:{label})\s*{number}"),
            "article_label_pattern",
        )?;

        if config.headers.is_empty() {
            return Err(StatuteSyncError::config(
                "segmenter.headers must list at least one keyword",
            ));
        }

        // Longest first so that e.g. SUBSEÇÃO wins over SEÇÃO-like prefixes.
        let mut keywords: Vec<&str> = config.headers.iter().map(|h| h.keyword.as_str()).collect();
        keywords.sort_by_key(|k| std::cmp::Reverse(k.chars().count()));
        let alternation = keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let header_line = compile(
            &format!(r"(?i)^\s*(?P<kw>{alternation})\b(?P<rest>.*)$"),
            "segmenter.headers",
        )?;

        let header_levels = config
            .headers
            .iter()
            .map(|h| (h.keyword.to_uppercase(), h.level))
            .collect();

        let continuation = compile(&config.continuation_pattern, "continuation_pattern")?;

        Ok(Self {
            article_line,
            article_anywhere,
            canonical_label: config.canonical_article_label.clone(),
            header_line,
            header_levels,
            continuation,
            title_max_chars: config.title_max_chars,
            title_max_words: config.title_max_words,
        })
    }

    /// Canonical article number if `line` starts with a numbered-article marker.
    pub fn article_number(&self, line: &str) -> Option<String> {
        self.article_line
            .captures(line)
            .map(|caps| self.canonical(&caps))
    }

    /// Every numbered-article reference in `text`, as `(byte_offset, canonical_number)`.
    pub fn article_references(&self, text: &str) -> Vec<(usize, String)> {
        self.article_anywhere
            .captures_iter(text)
            .filter_map(|caps| {
                let start = caps.get(0)?.start();
                Some((start, self.canonical(&caps)))
            })
            .collect()
    }

    /// Header information if `line` starts with a structural-header keyword.
    pub fn header(&self, line: &str) -> Option<HeaderMatch> {
        let caps = self.header_line.captures(line)?;
        let matched = caps.name("kw")?.as_str().to_uppercase();
        let (keyword, level) = self
            .header_levels
            .iter()
            .find(|(k, _)| *k == matched)
            .cloned()?;

        let designator = caps
            .name("rest")
            .and_then(|rest| rest.as_str().split_whitespace().next())
            .map(|token| token.trim_end_matches(['.', ',', ':', ';', '-', '–', '—']))
            .filter(|token| !token.is_empty())
            .map(str::to_uppercase);

        let designation = match designator {
            Some(d) => format!("{keyword} {d}"),
            None => keyword.clone(),
        };

        Some(HeaderMatch {
            keyword,
            level,
            designation,
        })
    }

    /// Whether `line` continues the current article (paragraph, item, sub-item).
    pub fn is_continuation(&self, line: &str) -> bool {
        self.continuation.is_match(line)
    }

    /// Whether `line` looks like a short descriptive title for the next article.
    pub fn is_title_candidate(&self, line: &str) -> bool {
        let line = line.trim();
        !line.is_empty()
            && line.chars().count() < self.title_max_chars
            && line.split_whitespace().count() <= self.title_max_words
            && !line.contains('.')
            && !self.is_continuation(line)
    }

    fn canonical(&self, caps: &regex::Captures<'_>) -> String {
        let num = caps.name("num").map(|m| m.as_str()).unwrap_or_default();
        let suffix = caps.name("suffix").map(|m| m.as_str()).unwrap_or_default();
        format!("{} {num}{suffix}", self.canonical_label)
    }
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self::from_config(&SegmenterConfig::default()).expect("default marker table compiles")
    }
}

fn compile(pattern: &str, field: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| StatuteSyncError::config(format!("invalid {field} regex: {e}")))
}
