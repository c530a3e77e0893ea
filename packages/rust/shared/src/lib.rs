//! Shared types, error model, and configuration for StatuteSync.
//!
//! This crate is the foundation depended on by all other StatuteSync crates.
//! It provides:
//! - [`StatuteSyncError`]: the unified error type
//! - Domain types ([`Article`], [`HistoryEntry`], [`AssetDecision`], [`Stage`], [`StatuteId`])
//! - Configuration ([`AppConfig`], [`SegmenterConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, HeaderKeyword, HistoryConfig, PipelineSettings, SegmenterConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{Result, StatuteSyncError};
pub use types::{
    Article, ArticleKind, AssetAction, AssetDecision, HistoryEntry, RunId, Stage, StatuteId,
};
