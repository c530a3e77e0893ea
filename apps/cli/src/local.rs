//! Local-file stand-ins for the external content collaborators.
//!
//! Fetch reads a text file, convert normalizes whitespace, format runs the
//! local segmenter, and validate compares the segmented article count with
//! the article markers found in the raw source.

use std::path::PathBuf;

use serde_json::json;

use statutesync_core::{
    ConvertOutput, FormatOutput, FormatProgress, PipelineService, ScrapeOutput, ValidationReport,
};
use statutesync_shared::{Article, ArticleKind, Result, StatuteSyncError};
use statutesync_text::Segmenter;

/// Minimum score the local validator approves.
const APPROVAL_SCORE: u8 = 90;

pub(crate) struct LocalTextService {
    segmenter: Segmenter,
}

impl LocalTextService {
    pub(crate) fn new(segmenter: Segmenter) -> Self {
        Self { segmenter }
    }

    fn marker_count(&self, text: &str) -> usize {
        let markers = self.segmenter.markers();
        text.lines()
            .filter(|line| markers.article_number(line).is_some())
            .count()
    }
}

fn source_path(source: &str) -> PathBuf {
    PathBuf::from(source.strip_prefix("file://").unwrap_or(source))
}

fn normalize(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl PipelineService for LocalTextService {
    async fn fetch(&self, source: &str) -> Result<ScrapeOutput> {
        let path = source_path(source);
        let raw_text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StatuteSyncError::io(&path, e))?;

        let lowered = raw_text.to_lowercase();
        Ok(ScrapeOutput {
            char_count: raw_text.chars().count(),
            heuristic_article_count: self.marker_count(&raw_text),
            revoked_count: lowered.matches("(revogad").count(),
            vetoed_count: lowered.matches("(vetad").count(),
            raw_html: String::new(),
            last_update_date: None,
            raw_text,
        })
    }

    async fn convert(&self, scrape: &ScrapeOutput) -> Result<ConvertOutput> {
        let clean_text = normalize(&scrape.raw_text);
        let stats = json!({
            "lines": clean_text.lines().count(),
            "chars": clean_text.chars().count(),
        });
        Ok(ConvertOutput { clean_text, stats })
    }

    async fn format(
        &self,
        clean_text: &str,
        progress: &dyn FormatProgress,
    ) -> Result<FormatOutput> {
        let articles = self.segmenter.segment(clean_text);
        let total = articles.len();
        for done in 1..=total {
            progress.articles_processed(done, total);
        }

        let headers = articles
            .iter()
            .filter(|a| a.kind == ArticleKind::StructuralHeader)
            .count();
        let stats = json!({ "articles": total - headers, "headers": headers });
        Ok(FormatOutput { articles, stats })
    }

    async fn validate(
        &self,
        articles: &[Article],
        formatted_text: &str,
        raw_text: &str,
    ) -> Result<ValidationReport> {
        let expected = self.marker_count(raw_text);
        let found = articles
            .iter()
            .filter(|a| a.kind == ArticleKind::Article)
            .count();

        let score = match expected {
            0 if found == 0 => 0,
            0 => 100,
            _ => (found.min(expected) * 100 / expected) as u8,
        };

        let mut problems = Vec::new();
        if found == 0 {
            problems.push("no articles were segmented".to_string());
        } else if found < expected {
            problems.push(format!(
                "{} article markers in the source were not segmented",
                expected - found
            ));
        }
        if formatted_text.trim().is_empty() {
            problems.push("formatted text is empty".to_string());
        }

        Ok(ValidationReport {
            approved: problems.is_empty() && score >= APPROVAL_SCORE,
            score,
            problems,
            stats: json!({ "expected": expected, "found": found }),
        })
    }
}
