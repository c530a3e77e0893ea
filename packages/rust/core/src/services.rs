//! Contracts for the external content collaborators.
//!
//! Fetching, HTML-to-text conversion, article formatting and quality scoring
//! happen outside this engine. [`PipelineService`] is the seam: one method per
//! stage, each returning a plain result. Implementations tag their own
//! failures or return any [`StatuteSyncError`]; the orchestrator attributes
//! untagged failures to the stage that produced them.
//!
//! [`StatuteSyncError`]: statutesync_shared::StatuteSyncError

use serde::{Deserialize, Serialize};

use statutesync_shared::{Article, Result};

/// Output of the fetch stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOutput {
    pub raw_text: String,
    pub raw_html: String,
    pub char_count: usize,
    pub heuristic_article_count: usize,
    pub revoked_count: usize,
    pub vetoed_count: usize,
    /// Publication's own "last updated" marker, verbatim.
    pub last_update_date: Option<String>,
}

/// Output of the HTML-to-text stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOutput {
    pub clean_text: String,
    #[serde(default)]
    pub stats: serde_json::Value,
}

/// Output of the format stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatOutput {
    pub articles: Vec<Article>,
    #[serde(default)]
    pub stats: serde_json::Value,
}

/// Output of the validation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub approved: bool,
    /// Quality score, 0..=100.
    pub score: u8,
    #[serde(default)]
    pub problems: Vec<String>,
    #[serde(default)]
    pub stats: serde_json::Value,
}

/// Push-based progress from inside the format stage.
pub trait FormatProgress: Send + Sync {
    /// `done` of `expected` articles formatted so far. `expected` may be 0
    /// when unknown.
    fn articles_processed(&self, done: usize, expected: usize);
}

/// The four external content stages.
#[allow(async_fn_in_trait)]
pub trait PipelineService {
    async fn fetch(&self, source: &str) -> Result<ScrapeOutput>;

    /// Convert the fetched document to clean line-oriented text.
    async fn convert(&self, scrape: &ScrapeOutput) -> Result<ConvertOutput>;

    /// Structure the clean text into articles, reporting progress as it goes.
    /// Returning no articles makes the orchestrator fall back to the local
    /// segmenter.
    async fn format(&self, clean_text: &str, progress: &dyn FormatProgress)
    -> Result<FormatOutput>;

    async fn validate(
        &self,
        articles: &[Article],
        formatted_text: &str,
        raw_text: &str,
    ) -> Result<ValidationReport>;
}
