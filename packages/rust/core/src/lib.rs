//! Reconciliation engine and pipeline orchestration for StatuteSync.
//!
//! This crate ties the text layer (segmentation, history extraction) and the
//! article store together:
//! - [`reconcile()`]: classify two snapshots into added/removed/modified/unchanged
//! - [`word_diff()`]: token-level highlighting for modified articles
//! - [`map_assets()`]: keep/regenerate/delete decisions for narration audio
//! - [`Pipeline`]: the staged, resumable, abortable update workflow

pub mod assets;
pub mod commit;
pub mod pipeline;
pub mod reconcile;
pub mod services;
pub mod word_diff;

pub use assets::{map_assets, tally};
pub use commit::{CommitCoordinator, StatuteLock};
pub use pipeline::{
    AbortHandle, AbortSignal, CommitOutcome, CommitPlan, Pipeline, PipelineConfig, PipelineState,
    ProgressReporter, SilentProgress, StageFailure,
};
pub use reconcile::{ModifiedArticle, ReconciliationCounts, ReconciliationResult, reconcile};
pub use services::{
    ConvertOutput, FormatOutput, FormatProgress, PipelineService, ScrapeOutput, ValidationReport,
};
pub use word_diff::{DiffToken, TokenKind, WordDiff, tokenize, word_diff};
