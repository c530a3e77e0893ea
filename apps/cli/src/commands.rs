//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use statutesync_core::{
    AbortHandle, CommitPlan, Pipeline, PipelineConfig, PipelineState, ProgressReporter,
    ReconciliationResult, reconcile, word_diff,
};
use statutesync_shared::{AppConfig, Article, Stage, StatuteId, init_config, load_config};
use statutesync_storage::Storage;
use statutesync_text::Segmenter;

use crate::local::LocalTextService;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// StatuteSync: keep statute snapshots and their narration in step.
#[derive(Parser)]
#[command(
    name = "statutesync",
    version,
    about = "Segment statute text, reconcile snapshots, and sync the article store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.statutesync/statutesync.toml).
    #[arg(long, env = "STATUTESYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Split a cleaned statute text file into articles.
    Segment {
        file: PathBuf,

        /// Print the article snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract amendment citations from a raw statute text file.
    History {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Classify two snapshots (JSON article arrays or text files).
    Reconcile {
        #[arg(long)]
        old: PathBuf,

        #[arg(long)]
        new: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Word-level diff of modified articles between two snapshots.
    Diff {
        #[arg(long)]
        old: PathBuf,

        #[arg(long)]
        new: PathBuf,

        /// Only this article number (e.g. "Art. 2").
        #[arg(long)]
        article: Option<String>,
    },

    /// Run the update pipeline for one statute and commit the result.
    Sync {
        /// Statute id in the article store.
        #[arg(long)]
        statute: String,

        /// Source text file.
        #[arg(long)]
        source: String,

        /// Stop before committing and print the plan.
        #[arg(long)]
        dry_run: bool,
    },

    /// List committed statutes.
    Statutes,

    /// Show or acknowledge narration assets queued for deletion.
    Cleanup {
        #[arg(long)]
        statute: String,

        /// Mark a queued item as deleted.
        #[arg(long)]
        complete: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "statutesync=info",
        1 => "statutesync=debug",
        _ => "statutesync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()).await,
        };
    }

    let config = resolve_config(cli.config.as_deref())?;
    match cli.command {
        Command::Segment { file, json } => cmd_segment(&config, &file, json).await,
        Command::History { file, json } => cmd_history(&config, &file, json).await,
        Command::Reconcile { old, new, json } => cmd_reconcile(&config, &old, &new, json).await,
        Command::Diff { old, new, article } => {
            cmd_diff(&config, &old, &new, article.as_deref()).await
        }
        Command::Sync {
            statute,
            source,
            dry_run,
        } => cmd_sync(&config, &statute, &source, dry_run).await,
        Command::Statutes => cmd_statutes(&config).await,
        Command::Cleanup { statute, complete } => {
            cmd_cleanup(&config, &statute, complete.as_deref()).await
        }
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => statutesync_shared::load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

fn segmenter(config: &AppConfig) -> Result<Segmenter> {
    let (segmenter, _) = statutesync_text::from_config(config)?;
    Ok(segmenter)
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| eyre!("cannot read '{}': {e}", path.display()))
}

/// A `.json` file is an article array; anything else is segmented as text.
fn load_snapshot(path: &Path, segmenter: &Segmenter) -> Result<Vec<Article>> {
    let raw = read_text(path)?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw)
            .map_err(|e| eyre!("'{}' is not an article snapshot: {e}", path.display()))
    } else {
        Ok(segmenter.segment(&raw))
    }
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Text commands
// ---------------------------------------------------------------------------

async fn cmd_segment(config: &AppConfig, file: &Path, json: bool) -> Result<()> {
    let articles = segmenter(config)?.segment(&read_text(file)?);
    info!(file = %file.display(), articles = articles.len(), "segmented");

    if json {
        println!("{}", serde_json::to_string_pretty(&articles)?);
        return Ok(());
    }
    for article in &articles {
        println!(
            "{:>4}  {:<28} {}",
            article.order,
            article.number,
            first_line(&article.content)
        );
    }
    Ok(())
}

async fn cmd_history(config: &AppConfig, file: &Path, json: bool) -> Result<()> {
    let (_, extractor) = statutesync_text::from_config(config)?;
    let entries = extractor.extract(&read_text(file)?);
    info!(file = %file.display(), entries = entries.len(), "extracted history");

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        let year = match entry.year {
            0 => "----".to_string(),
            y => y.to_string(),
        };
        println!("{year}  {}", entry.render());
    }
    Ok(())
}

async fn cmd_reconcile(config: &AppConfig, old: &Path, new: &Path, json: bool) -> Result<()> {
    let segmenter = segmenter(config)?;
    let old = load_snapshot(old, &segmenter)?;
    let new = load_snapshot(new, &segmenter)?;
    let result = reconcile(&old, &new);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_reconciliation(&result);
    }
    Ok(())
}

async fn cmd_diff(config: &AppConfig, old: &Path, new: &Path, article: Option<&str>) -> Result<()> {
    let segmenter = segmenter(config)?;
    let old = load_snapshot(old, &segmenter)?;
    let new = load_snapshot(new, &segmenter)?;
    let result = reconcile(&old, &new);

    let selected: Vec<_> = match article {
        Some(number) => {
            let modified = result
                .find_modified(number)
                .ok_or_else(|| eyre!("'{number}' is not a modified article"))?;
            vec![modified]
        }
        None => result.modified.iter().collect(),
    };

    for modified in selected {
        let diff = word_diff(&modified.old_content, &modified.new_content);
        println!(
            "== {} (-{} +{})",
            modified.number,
            diff.removed_count(),
            diff.added_count()
        );
        println!("{}", diff.render_inline());
        println!();
    }
    Ok(())
}

fn print_reconciliation(result: &ReconciliationResult) {
    println!("  {}", result.counts());
    for article in &result.added {
        println!("  + {}", article.number);
    }
    for article in &result.removed {
        println!("  - {}", article.number);
    }
    for modified in &result.modified {
        println!("  ~ {}", modified.number);
    }
}

fn print_plan(plan: &CommitPlan) {
    print_reconciliation(&plan.reconciliation);
    if plan.decisions.is_empty() {
        return;
    }
    println!();
    println!("  Narration:");
    for decision in &plan.decisions {
        println!(
            "    {:<10} {:<20} {}",
            decision.action.as_str(),
            decision.article_number,
            decision.reason
        );
    }
}

// ---------------------------------------------------------------------------
// Store commands
// ---------------------------------------------------------------------------

async fn open_store(config: &AppConfig) -> Result<Storage> {
    let path = config.pipeline.resolved_database_path()?;
    Ok(Storage::open(&path).await?)
}

async fn cmd_sync(config: &AppConfig, statute: &str, source: &str, dry_run: bool) -> Result<()> {
    let segmenter = segmenter(config)?;
    let store = open_store(config).await?;
    let pipeline = Pipeline::new(
        LocalTextService::new(segmenter.clone()),
        store,
        segmenter,
        PipelineConfig::from(&config.pipeline),
    );

    let (handle, signal) = AbortHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });

    info!(statute, source, dry_run, "syncing statute");
    let mut state = PipelineState::new(StatuteId::new(statute), source);
    let reporter = CliProgress::new();

    let outcome = pipeline.run(&mut state, &reporter, &signal).await;
    if let Err(e) = outcome {
        reporter.spinner.abandon();
        return Err(e.into());
    }

    if let Some(report) = &state.validation {
        println!(
            "  Validation: score {} ({})",
            report.score,
            if report.approved { "approved" } else { "not approved" }
        );
        for problem in &report.problems {
            println!("    ! {problem}");
        }
    }

    if dry_run {
        reporter.spinner.finish_and_clear();
        let plan = pipeline.plan(&state)?;
        println!();
        print_plan(&plan);
        println!();
        println!("  Dry run: nothing committed.");
        return Ok(());
    }

    let outcome = pipeline
        .reconcile_and_commit(&mut state, &reporter, &signal)
        .await;
    let outcome = match outcome {
        Ok(outcome) => {
            reporter.spinner.finish_and_clear();
            outcome
        }
        Err(e) => {
            reporter.spinner.abandon();
            return Err(e.into());
        }
    };

    println!();
    print_plan(&outcome.plan);
    println!();
    println!("  Statute {statute} committed.");
    println!("  Articles:        {}", outcome.report.inserted_count);
    println!("  Audio kept:      {}", outcome.report.kept_audio_count);
    println!("  Audio removed:   {}", outcome.report.removed_audio_count);
    println!();
    Ok(())
}

async fn cmd_statutes(config: &AppConfig) -> Result<()> {
    let store = open_store(config).await?;
    let statutes = store.list_statutes().await?;
    if statutes.is_empty() {
        println!("No statutes committed yet.");
        return Ok(());
    }
    for statute in statutes {
        println!(
            "{:<24} {:>5} articles  updated {}",
            statute.id,
            statute.article_count,
            statute.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn cmd_cleanup(config: &AppConfig, statute: &str, complete: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;

    if let Some(id) = complete {
        if !store.complete_cleanup(id).await? {
            return Err(eyre!("no queued cleanup item with id '{id}'"));
        }
        println!("Cleanup item {id} completed.");
        return Ok(());
    }

    let pending = store.pending_cleanup(&StatuteId::new(statute)).await?;
    if pending.is_empty() {
        println!("Nothing queued for {statute}.");
    }
    for item in pending {
        println!(
            "{}  {:<10} {:<20} {}",
            item.id, item.action, item.article_number, item.url
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

const BAR_TEMPLATE: &str = "{spinner:.cyan} {bar:30.cyan/blue} {pos:>3}% {msg}";

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new(100);
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, stage: Stage) {
        let message = match stage {
            Stage::Snapshot => "Loading stored articles",
            Stage::Fetch => "Fetching source",
            Stage::Convert => "Converting to clean text",
            Stage::Format => "Formatting articles",
            Stage::Validate => "Validating structure",
            Stage::Commit => "Reconciling and committing",
        };
        self.spinner.set_message(message);
    }

    fn percent(&self, value: u8) {
        self.spinner.set_position(u64::from(value));
    }

    fn done(&self, _state: &PipelineState) {
        self.spinner.set_message("Content stages complete");
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
