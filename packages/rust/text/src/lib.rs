//! Text analysis for statute snapshots.
//!
//! - [`MarkerTable`]: configurable article/header/continuation vocabularies
//! - [`Segmenter`]: cleaned text to ordered [`Article`](statutesync_shared::Article) records
//! - [`HistoryExtractor`]: amendment citations anchored to structural references
//!
//! Everything here is pure and synchronous; only compiling a [`MarkerTable`]
//! from user configuration can fail.

pub mod history;
pub mod markers;
pub mod segment;

pub use history::{HistoryExtractor, HistoryOptions, citation_year};
pub use markers::{HeaderMatch, MarkerTable};
pub use segment::Segmenter;

use statutesync_shared::{AppConfig, Result};

/// Build a segmenter and history extractor sharing one marker table.
pub fn from_config(config: &AppConfig) -> Result<(Segmenter, HistoryExtractor)> {
    let markers = MarkerTable::from_config(&config.segmenter)?;
    let history = HistoryExtractor::new(markers.clone(), HistoryOptions::from(&config.history));
    Ok((Segmenter::new(markers), history))
}
