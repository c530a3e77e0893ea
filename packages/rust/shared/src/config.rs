//! Application configuration for StatuteSync.
//!
//! User config lives at `~/.statutesync/statutesync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatuteSyncError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "statutesync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".statutesync";

// ---------------------------------------------------------------------------
// Config structs (matching statutesync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Marker vocabularies and title heuristics for segmentation.
    #[serde(default)]
    pub segmenter: SegmenterConfig,

    /// Amendment citation extraction limits.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Orchestration and commit policy.
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// One structural-header keyword and its nesting level (0 = outermost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderKeyword {
    pub keyword: String,
    pub level: u8,
}

impl HeaderKeyword {
    fn new(keyword: &str, level: u8) -> Self {
        Self {
            keyword: keyword.into(),
            level,
        }
    }
}

/// `[segmenter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Regex for the label token that introduces a numbered article.
    #[serde(default = "default_article_label_pattern")]
    pub article_label_pattern: String,

    /// Label used when rendering canonical article numbers.
    #[serde(default = "default_canonical_article_label")]
    pub canonical_article_label: String,

    /// Structural-header vocabulary, matched case-insensitively at line start.
    #[serde(default = "default_headers")]
    pub headers: Vec<HeaderKeyword>,

    /// Regex for lines that continue an article (paragraphs, items, sub-items).
    #[serde(default = "default_continuation_pattern")]
    pub continuation_pattern: String,

    /// A candidate title must be shorter than this many characters.
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    /// A candidate title may have at most this many words.
    #[serde(default = "default_title_max_words")]
    pub title_max_words: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            article_label_pattern: default_article_label_pattern(),
            canonical_article_label: default_canonical_article_label(),
            headers: default_headers(),
            continuation_pattern: default_continuation_pattern(),
            title_max_chars: default_title_max_chars(),
            title_max_words: default_title_max_words(),
        }
    }
}

fn default_article_label_pattern() -> String {
    r"Art(?:igo)?\.?".into()
}
fn default_canonical_article_label() -> String {
    "Art.".into()
}
fn default_headers() -> Vec<HeaderKeyword> {
    vec![
        HeaderKeyword::new("PARTE", 0),
        HeaderKeyword::new("LIVRO", 1),
        HeaderKeyword::new("TÍTULO", 2),
        HeaderKeyword::new("TITULO", 2),
        HeaderKeyword::new("CAPÍTULO", 3),
        HeaderKeyword::new("CAPITULO", 3),
        HeaderKeyword::new("SEÇÃO", 4),
        HeaderKeyword::new("SECAO", 4),
        HeaderKeyword::new("SUBSEÇÃO", 5),
        HeaderKeyword::new("SUBSECAO", 5),
    ]
}
fn default_continuation_pattern() -> String {
    r"^\s*(?:§|Parágrafo\s+único|[IVXLCDM]+\s*[-–—]|[a-z]\))".into()
}
fn default_title_max_chars() -> usize {
    80
}
fn default_title_max_words() -> usize {
    8
}

/// `[history]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// How far back (in characters) to look for a structural anchor.
    #[serde(default = "default_lookback_chars")]
    pub lookback_chars: usize,

    /// Citations shorter than this are treated as noise.
    #[serde(default = "default_min_citation_chars")]
    pub min_citation_chars: usize,

    /// Citations longer than this are treated as noise.
    #[serde(default = "default_max_citation_chars")]
    pub max_citation_chars: usize,

    /// Distinct anchors kept per citation text.
    #[serde(default = "default_max_anchors")]
    pub max_anchors: usize,

    /// Entries kept after sorting by year.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_chars: default_lookback_chars(),
            min_citation_chars: default_min_citation_chars(),
            max_citation_chars: default_max_citation_chars(),
            max_anchors: default_max_anchors(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_lookback_chars() -> usize {
    500
}
fn default_min_citation_chars() -> usize {
    10
}
fn default_max_citation_chars() -> usize {
    200
}
fn default_max_anchors() -> usize {
    3
}
fn default_max_entries() -> usize {
    50
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Refuse to commit unless the validation service approved the structure.
    #[serde(default)]
    pub require_approval: bool,

    /// Queue narration audio of removed articles for deletion on commit.
    #[serde(default = "default_true")]
    pub delete_removed_audio: bool,

    /// Path of the libSQL article database.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            require_approval: false,
            delete_removed_audio: true,
            database_path: default_database_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_database_path() -> String {
    "~/.statutesync/articles.db".into()
}

impl PipelineSettings {
    /// Resolve `database_path`, expanding a leading `~/` to the home directory.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        expand_home(&self.database_path)
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| StatuteSyncError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.statutesync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StatuteSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.statutesync/statutesync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StatuteSyncError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        StatuteSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StatuteSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StatuteSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StatuteSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
