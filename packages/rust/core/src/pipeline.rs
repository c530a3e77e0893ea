//! Pipeline orchestrator: snapshot → fetch → convert → format → validate,
//! then a separately triggered reconcile + commit.
//!
//! All run data lives in one [`PipelineState`] value that is replaced
//! wholesale at every checkpoint. A failed or aborted stage leaves every
//! earlier checkpoint intact, and running again resumes from the first
//! stage without output.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use statutesync_shared::{
    Article, ArticleKind, AssetDecision, PipelineSettings, Result, RunId, Stage, StatuteId,
    StatuteSyncError,
};
use statutesync_storage::{ArticleStore, CommitReport, CommitRequest};
use statutesync_text::Segmenter;

use crate::assets::map_assets;
use crate::commit::CommitCoordinator;
use crate::reconcile::{ReconciliationResult, reconcile};
use crate::services::{
    ConvertOutput, FormatOutput, FormatProgress, PipelineService, ScrapeOutput, ValidationReport,
};

// ---------------------------------------------------------------------------
// Progress checkpoints
// ---------------------------------------------------------------------------

const SNAPSHOT_DONE: u8 = 5;
const FETCH_DONE: u8 = 15;
const CONVERT_DONE: u8 = 30;
const FORMAT_DONE: u8 = 70;
const VALIDATE_DONE: u8 = 85;
const COMMIT_DONE: u8 = 100;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn phase(&self, stage: Stage);
    /// Called whenever the 0..=100 progress scalar advances.
    fn percent(&self, value: u8);
    /// Called when the content stages have all completed.
    fn done(&self, state: &PipelineState);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _stage: Stage) {}
    fn percent(&self, _value: u8) {}
    fn done(&self, _state: &PipelineState) {}
}

/// Maps format-stage article counts onto the format band of the scalar.
struct FormatBand<'a> {
    reporter: &'a dyn ProgressReporter,
    current: AtomicU8,
}

impl FormatProgress for FormatBand<'_> {
    fn articles_processed(&self, done: usize, expected: usize) {
        if expected == 0 {
            return;
        }
        let span = usize::from(FORMAT_DONE - CONVERT_DONE);
        let value = CONVERT_DONE + (span * done.min(expected) / expected) as u8;
        let previous = self.current.fetch_max(value, Ordering::Relaxed);
        if value > previous {
            self.reporter.percent(value);
        }
    }
}

// ---------------------------------------------------------------------------
// Abort
// ---------------------------------------------------------------------------

/// Caller side of an abort request.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// Pipeline side of an abort request; cheap to clone.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortHandle {
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, AbortSignal { rx })
    }

    /// Abort the in-flight stage, if any, and every later one.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once an abort has been requested.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped without aborting.
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Why the last attempted stage did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// Everything one pipeline run has produced so far.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub run_id: RunId,
    pub statute_id: StatuteId,
    pub source: String,
    pub old_articles: Option<Vec<Article>>,
    pub scrape: Option<ScrapeOutput>,
    pub conversion: Option<ConvertOutput>,
    pub formatted: Option<FormatOutput>,
    pub validation: Option<ValidationReport>,
    pub committed: Option<CommitReport>,
    /// 0..=100, advanced at fixed checkpoints.
    pub progress: u8,
    pub failure: Option<StageFailure>,
}

impl PipelineState {
    pub fn new(statute_id: StatuteId, source: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            statute_id,
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_old_articles(self, articles: Vec<Article>) -> Self {
        Self {
            old_articles: Some(articles),
            progress: self.progress.max(SNAPSHOT_DONE),
            failure: None,
            ..self
        }
    }

    /// Record fetch output; invalidates everything downstream of it.
    pub fn with_scrape(self, scrape: ScrapeOutput) -> Self {
        Self {
            scrape: Some(scrape),
            conversion: None,
            formatted: None,
            validation: None,
            committed: None,
            progress: FETCH_DONE,
            failure: None,
            ..self
        }
    }

    pub fn with_conversion(self, conversion: ConvertOutput) -> Self {
        Self {
            conversion: Some(conversion),
            formatted: None,
            validation: None,
            committed: None,
            progress: CONVERT_DONE,
            failure: None,
            ..self
        }
    }

    pub fn with_formatted(self, formatted: FormatOutput) -> Self {
        Self {
            formatted: Some(formatted),
            validation: None,
            committed: None,
            progress: FORMAT_DONE,
            failure: None,
            ..self
        }
    }

    pub fn with_validation(self, validation: ValidationReport) -> Self {
        Self {
            validation: Some(validation),
            committed: None,
            progress: VALIDATE_DONE,
            failure: None,
            ..self
        }
    }

    pub fn with_commit(self, report: CommitReport) -> Self {
        Self {
            committed: Some(report),
            progress: COMMIT_DONE,
            failure: None,
            ..self
        }
    }

    pub fn with_failure(self, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            failure: Some(StageFailure {
                stage,
                message: message.into(),
            }),
            ..self
        }
    }

    /// The next stage a run would execute, or `None` once committed.
    pub fn next_stage(&self) -> Option<Stage> {
        if self.old_articles.is_none() {
            Some(Stage::Snapshot)
        } else if self.scrape.is_none() {
            Some(Stage::Fetch)
        } else if self.conversion.is_none() {
            Some(Stage::Convert)
        } else if self.formatted.is_none() {
            Some(Stage::Format)
        } else if self.validation.is_none() {
            Some(Stage::Validate)
        } else if self.committed.is_none() {
            Some(Stage::Commit)
        } else {
            None
        }
    }
}

/// Replace `state` with the value `advance` derives from it.
fn checkpoint(state: &mut PipelineState, advance: impl FnOnce(PipelineState) -> PipelineState) {
    let current = std::mem::take(state);
    *state = advance(current);
}

// ---------------------------------------------------------------------------
// Config & outcomes
// ---------------------------------------------------------------------------

/// Commit policy for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub require_approval: bool,
    pub delete_removed_audio: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            require_approval: settings.require_approval,
            delete_removed_audio: settings.delete_removed_audio,
        }
    }
}

/// What a commit would apply, computed from the current state.
#[derive(Debug, Clone, Serialize)]
pub struct CommitPlan {
    /// The new snapshot, orders re-densified to 1..N.
    pub articles: Vec<Article>,
    pub reconciliation: ReconciliationResult,
    pub decisions: Vec<AssetDecision>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub plan: CommitPlan,
    pub report: CommitReport,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Orchestrates the external stages and the local reconciliation engine.
pub struct Pipeline<P, S> {
    service: P,
    store: S,
    segmenter: Segmenter,
    config: PipelineConfig,
    coordinator: Arc<CommitCoordinator>,
}

impl<P: PipelineService, S: ArticleStore> Pipeline<P, S> {
    pub fn new(service: P, store: S, segmenter: Segmenter, config: PipelineConfig) -> Self {
        Self {
            service,
            store,
            segmenter,
            config,
            coordinator: Arc::new(CommitCoordinator::new()),
        }
    }

    /// Share a commit coordinator with other pipelines on the same store.
    pub fn with_coordinator(mut self, coordinator: Arc<CommitCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every content stage that has no checkpoint yet, in order.
    ///
    /// On failure the error is tagged with its stage, recorded in
    /// `state.failure`, and all earlier checkpoints are kept.
    #[instrument(skip_all, fields(statute = %state.statute_id, run = %state.run_id))]
    pub async fn run(
        &self,
        state: &mut PipelineState,
        progress: &dyn ProgressReporter,
        abort: &AbortSignal,
    ) -> Result<()> {
        info!(next = ?state.next_stage(), "running pipeline");

        if state.old_articles.is_none() {
            progress.phase(Stage::Snapshot);
            let outcome = guarded(
                Stage::Snapshot,
                abort,
                self.store.load_articles(&state.statute_id),
            )
            .await;
            let old = record(state, Stage::Snapshot, outcome)?;
            info!(articles = old.len(), "old snapshot loaded");
            checkpoint(state, |s| s.with_old_articles(old));
            progress.percent(state.progress);
        }

        if state.scrape.is_none() {
            progress.phase(Stage::Fetch);
            let outcome = guarded(Stage::Fetch, abort, self.service.fetch(&state.source)).await;
            let scrape = record(state, Stage::Fetch, outcome)?;
            info!(
                chars = scrape.char_count,
                heuristic_articles = scrape.heuristic_article_count,
                "fetched source"
            );
            checkpoint(state, |s| s.with_scrape(scrape));
            progress.percent(state.progress);
        }

        if state.conversion.is_none() {
            progress.phase(Stage::Convert);
            let scrape = require(state.scrape.as_ref(), Stage::Fetch)?;
            let outcome = guarded(Stage::Convert, abort, self.service.convert(scrape)).await;
            let conversion = record(state, Stage::Convert, outcome)?;
            info!(chars = conversion.clean_text.len(), "converted to clean text");
            checkpoint(state, |s| s.with_conversion(conversion));
            progress.percent(state.progress);
        }

        if state.formatted.is_none() {
            progress.phase(Stage::Format);
            let conversion = require(state.conversion.as_ref(), Stage::Convert)?;
            let band = FormatBand {
                reporter: progress,
                current: AtomicU8::new(CONVERT_DONE),
            };
            let outcome = guarded(
                Stage::Format,
                abort,
                self.service.format(&conversion.clean_text, &band),
            )
            .await;
            let formatted = record(state, Stage::Format, outcome)?;
            info!(articles = formatted.articles.len(), "formatted articles");
            checkpoint(state, |s| s.with_formatted(formatted));
            progress.percent(state.progress);
        }

        if state.validation.is_none() {
            progress.phase(Stage::Validate);
            let articles = self.new_snapshot(state)?;
            let formatted_text = articles
                .iter()
                .map(|a| a.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let raw_text = require(state.scrape.as_ref(), Stage::Fetch)?
                .raw_text
                .as_str();
            let outcome = guarded(
                Stage::Validate,
                abort,
                self.service.validate(&articles, &formatted_text, raw_text),
            )
            .await;
            let report = record(state, Stage::Validate, outcome)?;
            if report.approved {
                info!(score = report.score, "validation approved");
            } else {
                warn!(
                    score = report.score,
                    problems = report.problems.len(),
                    "validation did not approve"
                );
            }
            checkpoint(state, |s| s.with_validation(report));
            progress.percent(state.progress);
        }

        progress.done(state);
        Ok(())
    }

    /// Reconcile the formatted snapshot against the old one without writing.
    pub fn plan(&self, state: &PipelineState) -> Result<CommitPlan> {
        let old = loaded_snapshot(state)?;
        Ok(plan_against(old, self.new_snapshot(state)?))
    }

    /// Reconcile and atomically commit. Requires format output and the old
    /// snapshot; with `require_approval`, also an approving validation.
    ///
    /// The statute's write lock covers re-reading the stored snapshot,
    /// reconciling against it and committing, so asset decisions always
    /// refer to what is stored at commit time.
    #[instrument(skip_all, fields(statute = %state.statute_id, run = %state.run_id))]
    pub async fn reconcile_and_commit(
        &self,
        state: &mut PipelineState,
        progress: &dyn ProgressReporter,
        abort: &AbortSignal,
    ) -> Result<CommitOutcome> {
        progress.phase(Stage::Commit);

        let prepared = self.check_approval(state).and_then(|()| {
            loaded_snapshot(state)?;
            self.new_snapshot(state)
        });
        let articles = record(state, Stage::Commit, prepared)?;

        let outcome = guarded(Stage::Commit, abort, self.commit_locked(state, articles)).await;
        let (current, outcome) = record(state, Stage::Commit, outcome)?;

        checkpoint(state, |s| PipelineState {
            old_articles: Some(current),
            ..s.with_commit(outcome.report)
        });
        progress.percent(state.progress);
        Ok(outcome)
    }

    /// Under the statute lock: reload, reconcile, commit. Returns the stored
    /// snapshot the plan was made against.
    async fn commit_locked(
        &self,
        state: &PipelineState,
        articles: Vec<Article>,
    ) -> Result<(Vec<Article>, CommitOutcome)> {
        let _lock = self.coordinator.acquire(&state.statute_id).await;

        let current = self.store.load_articles(&state.statute_id).await?;
        if state.old_articles.as_deref() != Some(current.as_slice()) {
            warn!(
                loaded = state.old_articles.as_ref().map_or(0, Vec::len),
                current = current.len(),
                "stored snapshot changed during the run, reconciling against the current one"
            );
        }

        let plan = plan_against(&current, articles);
        info!(summary = %plan.reconciliation, decisions = plan.decisions.len(), "committing");

        let request = CommitRequest {
            statute_id: state.statute_id.clone(),
            articles: plan.articles.clone(),
            decisions: plan.decisions.clone(),
            delete_removed_audio: self.config.delete_removed_audio,
        };
        let report = self.store.commit(&request).await?;
        Ok((current, CommitOutcome { plan, report }))
    }

    fn check_approval(&self, state: &PipelineState) -> Result<()> {
        match &state.validation {
            Some(report) if report.approved => Ok(()),
            Some(report) if self.config.require_approval => {
                Err(StatuteSyncError::validation(format!(
                    "validation did not approve the structure (score {}); approval is required",
                    report.score
                )))
            }
            None if self.config.require_approval => Err(StatuteSyncError::validation(
                "validation has not run; approval is required",
            )),
            Some(report) => {
                warn!(score = report.score, "committing without validation approval");
                Ok(())
            }
            None => {
                warn!("committing without validation");
                Ok(())
            }
        }
    }

    /// The snapshot that would be committed: format output, or local
    /// segmentation of the clean text when format produced nothing.
    fn new_snapshot(&self, state: &PipelineState) -> Result<Vec<Article>> {
        let formatted = require(state.formatted.as_ref(), Stage::Format)?;
        let segmented = state
            .conversion
            .as_ref()
            .map(|c| self.segmenter.segment(&c.clean_text))
            .unwrap_or_default();

        let mut articles = if formatted.articles.is_empty() {
            warn!(
                segmented = segmented.len(),
                "format returned no articles, using local segmentation"
            );
            segmented
        } else {
            let formatted_count = count_articles(&formatted.articles);
            let local_count = count_articles(&segmented);
            if state.conversion.is_some() && formatted_count != local_count {
                warn!(
                    formatted = formatted_count,
                    segmented = local_count,
                    "article count diverges from local segmentation"
                );
            }
            formatted.articles.clone()
        };

        articles.sort_by_key(|a| a.order);
        for (i, article) in articles.iter_mut().enumerate() {
            article.order = i as u32 + 1;
            article.narration_url = None;
        }
        Ok(articles)
    }
}

fn loaded_snapshot(state: &PipelineState) -> Result<&[Article]> {
    state
        .old_articles
        .as_deref()
        .ok_or_else(|| StatuteSyncError::validation("old snapshot has not been loaded"))
}

fn plan_against(old: &[Article], articles: Vec<Article>) -> CommitPlan {
    let reconciliation = reconcile(old, &articles);
    let decisions = map_assets(old, &reconciliation);
    CommitPlan {
        articles,
        reconciliation,
        decisions,
    }
}

fn count_articles(articles: &[Article]) -> usize {
    articles
        .iter()
        .filter(|a| a.kind == ArticleKind::Article)
        .count()
}

fn require<T>(output: Option<&T>, stage: Stage) -> Result<&T> {
    output.ok_or_else(|| {
        StatuteSyncError::validation(format!("{stage} stage has not completed"))
    })
}

/// Run `work` unless or until `abort` fires; untagged errors get `stage`.
async fn guarded<T>(
    stage: Stage,
    abort: &AbortSignal,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    let mut signal = abort.clone();
    if signal.is_aborted() {
        return Err(StatuteSyncError::Aborted { stage });
    }

    tokio::select! {
        biased;
        () = signal.aborted() => Err(StatuteSyncError::Aborted { stage }),
        outcome = work => outcome.map_err(|error| attribute(stage, error)),
    }
}

fn attribute(stage: Stage, error: StatuteSyncError) -> StatuteSyncError {
    match error {
        StatuteSyncError::Stage { .. }
        | StatuteSyncError::Aborted { .. }
        | StatuteSyncError::Commit(_) => error,
        other => StatuteSyncError::stage(stage, other.to_string()),
    }
}

/// On failure, note it in `state` and pass the error through.
fn record<T>(state: &mut PipelineState, stage: Stage, outcome: Result<T>) -> Result<T> {
    outcome.map_err(|error| {
        warn!(%stage, %error, "stage did not complete; earlier checkpoints kept");
        checkpoint(state, |s| s.with_failure(stage, error.to_string()));
        error
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use statutesync_shared::AssetAction;

    use crate::assets::tally;

    const V1: &str = include_str!("../../../../fixtures/text/statute_v1.txt");
    const V2: &str = include_str!("../../../../fixtures/text/statute_v2.txt");

    // -- fakes --------------------------------------------------------------

    #[derive(Default)]
    struct FakeService {
        text: String,
        /// `None` segments the text locally; `Some(vec![])` returns nothing.
        articles: Option<Vec<Article>>,
        fail_at: Mutex<Option<Stage>>,
        approved: bool,
        hang_format: bool,
        fetches: AtomicUsize,
    }

    impl FakeService {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                approved: true,
                ..Self::default()
            }
        }

        fn fails(&self, stage: Stage) -> bool {
            *self.fail_at.lock().expect("lock") == Some(stage)
        }
    }

    impl PipelineService for FakeService {
        async fn fetch(&self, _source: &str) -> Result<ScrapeOutput> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fails(Stage::Fetch) {
                return Err(StatuteSyncError::parse("upstream returned 503"));
            }
            Ok(ScrapeOutput {
                raw_text: self.text.clone(),
                raw_html: format!("<pre>{}</pre>", self.text),
                char_count: self.text.chars().count(),
                ..ScrapeOutput::default()
            })
        }

        async fn convert(&self, scrape: &ScrapeOutput) -> Result<ConvertOutput> {
            if self.fails(Stage::Convert) {
                return Err(StatuteSyncError::parse("model timed out"));
            }
            Ok(ConvertOutput {
                clean_text: scrape.raw_text.clone(),
                stats: serde_json::Value::Null,
            })
        }

        async fn format(
            &self,
            clean_text: &str,
            progress: &dyn FormatProgress,
        ) -> Result<FormatOutput> {
            if self.hang_format {
                return std::future::pending().await;
            }
            let articles = match &self.articles {
                Some(articles) => articles.clone(),
                None => Segmenter::default().segment(clean_text),
            };
            let total = articles.len();
            progress.articles_processed(total / 4, total);
            progress.articles_processed(total / 2, total);
            progress.articles_processed(1, total);
            progress.articles_processed(total, total);
            Ok(FormatOutput {
                articles,
                stats: serde_json::Value::Null,
            })
        }

        async fn validate(
            &self,
            articles: &[Article],
            _formatted_text: &str,
            _raw_text: &str,
        ) -> Result<ValidationReport> {
            Ok(ValidationReport {
                approved: self.approved,
                score: if self.approved { 95 } else { 40 },
                problems: if self.approved || articles.is_empty() {
                    vec![]
                } else {
                    vec!["missing articles".into()]
                },
                stats: serde_json::Value::Null,
            })
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        articles: Mutex<Vec<Article>>,
        commits: AtomicUsize,
    }

    impl MemoryStore {
        fn seeded(articles: Vec<Article>) -> Self {
            Self {
                articles: Mutex::new(articles),
                commits: AtomicUsize::new(0),
            }
        }

        fn snapshot(&self) -> Vec<Article> {
            self.articles.lock().expect("lock").clone()
        }
    }

    impl ArticleStore for MemoryStore {
        async fn load_articles(&self, _statute: &StatuteId) -> Result<Vec<Article>> {
            Ok(self.snapshot())
        }

        async fn commit(&self, request: &CommitRequest) -> Result<CommitReport> {
            let kept: HashMap<&str, &str> = request
                .decisions
                .iter()
                .filter_map(|d| Some((d.article_number.as_str(), d.url.as_deref()?)))
                .collect();
            let stored = request
                .articles
                .iter()
                .map(|a| match kept.get(a.number.as_str()) {
                    Some(url) => a.clone().with_narration(*url),
                    None => a.clone(),
                })
                .collect();
            *self.articles.lock().expect("lock") = stored;
            self.commits.fetch_add(1, Ordering::SeqCst);

            let (keep, regenerate, delete) = tally(&request.decisions);
            Ok(CommitReport {
                inserted_count: request.articles.len(),
                kept_audio_count: keep,
                removed_audio_count: regenerate
                    + if request.delete_removed_audio { delete } else { 0 },
            })
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<Stage>>,
        percents: Mutex<Vec<u8>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, stage: Stage) {
            self.phases.lock().expect("lock").push(stage);
        }
        fn percent(&self, value: u8) {
            self.percents.lock().expect("lock").push(value);
        }
        fn done(&self, _state: &PipelineState) {}
    }

    fn narrated_v1() -> Vec<Article> {
        Segmenter::default()
            .segment(V1)
            .into_iter()
            .map(|a| {
                if a.kind == ArticleKind::Article {
                    let url = format!("https://audio.example/{}.mp3", a.order);
                    a.with_narration(url)
                } else {
                    a
                }
            })
            .collect()
    }

    fn pipeline(
        service: FakeService,
        store: MemoryStore,
        config: PipelineConfig,
    ) -> Pipeline<FakeService, MemoryStore> {
        Pipeline::new(service, store, Segmenter::default(), config)
    }

    fn state() -> PipelineState {
        PipelineState::new(StatuteId::new("codigo-penal"), "file://statute_v2.txt")
    }

    // -- tests --------------------------------------------------------------

    #[tokio::test]
    async fn full_run_and_commit() {
        let p = pipeline(
            FakeService::new(V2),
            MemoryStore::seeded(narrated_v1()),
            PipelineConfig::default(),
        );
        let progress = RecordingProgress::default();
        let mut state = state();

        p.run(&mut state, &progress, &AbortSignal::never())
            .await
            .expect("run");
        assert_eq!(state.progress, VALIDATE_DONE);
        assert_eq!(state.next_stage(), Some(Stage::Commit));

        let outcome = p
            .reconcile_and_commit(&mut state, &progress, &AbortSignal::never())
            .await
            .expect("commit");
        assert_eq!(state.progress, COMMIT_DONE);
        assert_eq!(state.next_stage(), None);

        let counts = outcome.plan.reconciliation.counts();
        assert_eq!((counts.added, counts.removed, counts.modified), (1, 1, 2));
        assert_eq!(
            outcome.report,
            CommitReport {
                inserted_count: 10,
                kept_audio_count: 2,
                removed_audio_count: 3,
            }
        );

        let stored = p.store().snapshot();
        let art1 = stored.iter().find(|a| a.number == "Art. 1").expect("Art. 1");
        assert_eq!(art1.narration(), Some("https://audio.example/3.mp3"));
        let art2 = stored.iter().find(|a| a.number == "Art. 2").expect("Art. 2");
        assert!(art2.narration().is_none());

        let phases = progress.phases.lock().expect("lock").clone();
        assert_eq!(
            phases,
            vec![
                Stage::Snapshot,
                Stage::Fetch,
                Stage::Convert,
                Stage::Format,
                Stage::Validate,
                Stage::Commit,
            ]
        );
        let percents = progress.percents.lock().expect("lock").clone();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&COMMIT_DONE));
    }

    #[tokio::test]
    async fn format_progress_refines_the_band() {
        let p = pipeline(
            FakeService::new(V2),
            MemoryStore::default(),
            PipelineConfig::default(),
        );
        let progress = RecordingProgress::default();
        let mut state = state();
        p.run(&mut state, &progress, &AbortSignal::never())
            .await
            .expect("run");

        let percents = progress.percents.lock().expect("lock").clone();
        // 10 articles: 2/10, 5/10, (1/10 ignored), 10/10
        assert_eq!(
            percents,
            vec![SNAPSHOT_DONE, FETCH_DONE, CONVERT_DONE, 38, 50, 70, 70, VALIDATE_DONE]
        );
    }

    #[tokio::test]
    async fn stage_failure_keeps_checkpoints_and_resumes() {
        let service = FakeService::new(V2);
        *service.fail_at.lock().expect("lock") = Some(Stage::Convert);
        let p = pipeline(service, MemoryStore::default(), PipelineConfig::default());
        let mut state = state();

        let err = p
            .run(&mut state, &SilentProgress, &AbortSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err.stage_tag(), Some(Stage::Convert));
        assert!(err.to_string().starts_with("convert stage failed"));
        assert!(state.scrape.is_some());
        assert!(state.conversion.is_none());
        assert_eq!(state.progress, FETCH_DONE);
        assert_eq!(
            state.failure.as_ref().map(|f| f.stage),
            Some(Stage::Convert)
        );

        *p.service.fail_at.lock().expect("lock") = None;
        p.run(&mut state, &SilentProgress, &AbortSignal::never())
            .await
            .expect("resume");
        assert!(state.failure.is_none());
        assert!(state.validation.is_some());
        assert_eq!(p.service.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_discards_in_flight_stage_only() {
        let service = FakeService {
            hang_format: true,
            ..FakeService::new(V2)
        };
        let p = pipeline(service, MemoryStore::default(), PipelineConfig::default());
        let (handle, signal) = AbortHandle::new();
        let mut state = state();

        let (outcome, ()) = tokio::join!(p.run(&mut state, &SilentProgress, &signal), async {
            tokio::task::yield_now().await;
            handle.abort();
        });

        let err = outcome.unwrap_err();
        assert!(matches!(
            err,
            StatuteSyncError::Aborted {
                stage: Stage::Format
            }
        ));
        assert!(state.conversion.is_some());
        assert!(state.formatted.is_none());
        assert_eq!(state.progress, CONVERT_DONE);

        // Still aborted: nothing further runs.
        let err = p
            .run(&mut state, &SilentProgress, &signal)
            .await
            .unwrap_err();
        assert!(matches!(err, StatuteSyncError::Aborted { .. }));
    }

    #[tokio::test]
    async fn approval_gate_blocks_commit() {
        let service = FakeService {
            approved: false,
            ..FakeService::new(V2)
        };
        let config = PipelineConfig {
            require_approval: true,
            ..PipelineConfig::default()
        };
        let p = pipeline(service, MemoryStore::seeded(narrated_v1()), config);
        let mut state = state();
        p.run(&mut state, &SilentProgress, &AbortSignal::never())
            .await
            .expect("run");

        let err = p
            .reconcile_and_commit(&mut state, &SilentProgress, &AbortSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("approval is required"));
        assert_eq!(p.store().commits.load(Ordering::SeqCst), 0);
        assert_eq!(
            state.failure.as_ref().map(|f| f.stage),
            Some(Stage::Commit)
        );
        assert!(state.validation.is_some());
    }

    #[tokio::test]
    async fn commit_requires_format_output() {
        let p = pipeline(
            FakeService::new(V2),
            MemoryStore::default(),
            PipelineConfig::default(),
        );
        let mut state = state().with_old_articles(vec![]);
        let err = p
            .reconcile_and_commit(&mut state, &SilentProgress, &AbortSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("format stage has not completed"));
    }

    #[tokio::test]
    async fn empty_format_output_falls_back_to_segmenter() {
        let service = FakeService {
            articles: Some(vec![]),
            ..FakeService::new(V2)
        };
        let p = pipeline(service, MemoryStore::default(), PipelineConfig::default());
        let mut state = state();
        p.run(&mut state, &SilentProgress, &AbortSignal::never())
            .await
            .expect("run");

        let plan = p.plan(&state).expect("plan");
        assert_eq!(plan.articles.len(), 10);
        assert_eq!(plan.reconciliation.counts().added, 10);
        assert!(plan.decisions.is_empty());
    }

    #[tokio::test]
    async fn formatted_orders_are_redensified() {
        let service = FakeService {
            articles: Some(vec![
                Article::new("Art. 2", "b", 20, ArticleKind::Article),
                Article::new("Art. 1", "a", 10, ArticleKind::Article).with_narration("stray"),
            ]),
            ..FakeService::new("Art. 1 a\nArt. 2 b")
        };
        let p = pipeline(service, MemoryStore::default(), PipelineConfig::default());
        let mut state = state();
        p.run(&mut state, &SilentProgress, &AbortSignal::never())
            .await
            .expect("run");

        let plan = p.plan(&state).expect("plan");
        let shape: Vec<(&str, u32)> = plan
            .articles
            .iter()
            .map(|a| (a.number.as_str(), a.order))
            .collect();
        assert_eq!(shape, vec![("Art. 1", 1), ("Art. 2", 2)]);
        assert!(plan.articles.iter().all(|a| a.narration_url.is_none()));
    }

    #[tokio::test]
    async fn overlapping_runs_reconcile_against_the_stored_snapshot() {
        let seeded = Article::new("Art. 1", "Art. 1 texto A", 1, ArticleKind::Article)
            .with_narration("u1");
        let store = Arc::new(MemoryStore::seeded(vec![seeded]));
        let coordinator = Arc::new(CommitCoordinator::new());
        let pipeline_for = |text: &str| {
            Pipeline::new(
                FakeService::new(text),
                Arc::clone(&store),
                Segmenter::default(),
                PipelineConfig::default(),
            )
            .with_coordinator(Arc::clone(&coordinator))
        };
        let amending = pipeline_for("Art. 1 texto alterado");
        let restating = pipeline_for("Art. 1 texto A");

        // Both runs load the same snapshot before either commits.
        let (mut first, mut second) = (state(), state());
        amending
            .run(&mut first, &SilentProgress, &AbortSignal::never())
            .await
            .expect("first run");
        restating
            .run(&mut second, &SilentProgress, &AbortSignal::never())
            .await
            .expect("second run");

        let outcome = amending
            .reconcile_and_commit(&mut first, &SilentProgress, &AbortSignal::never())
            .await
            .expect("first commit");
        let actions: Vec<_> = outcome.plan.decisions.iter().map(|d| d.action).collect();
        assert_eq!(actions, vec![AssetAction::Regenerate]);

        // The stale in-memory snapshot still carries u1; the stored one does not.
        let outcome = restating
            .reconcile_and_commit(&mut second, &SilentProgress, &AbortSignal::never())
            .await
            .expect("second commit");
        assert!(outcome.plan.decisions.is_empty());
        assert_eq!(outcome.report.kept_audio_count, 0);
        assert_eq!(outcome.plan.reconciliation.counts().modified, 1);

        let stored = store.snapshot();
        assert_eq!(stored[0].content, "Art. 1 texto A");
        assert!(stored[0].narration().is_none());
        let reconciled_against = second.old_articles.as_ref().map(|old| old[0].content.clone());
        assert_eq!(reconciled_against.as_deref(), Some("Art. 1 texto alterado"));
    }

    #[tokio::test]
    async fn refetch_invalidates_downstream_checkpoints() {
        let state = state()
            .with_old_articles(vec![])
            .with_scrape(ScrapeOutput::default())
            .with_conversion(ConvertOutput::default())
            .with_formatted(FormatOutput::default());
        assert_eq!(state.next_stage(), Some(Stage::Validate));

        let state = state.with_scrape(ScrapeOutput::default());
        assert!(state.conversion.is_none());
        assert!(state.formatted.is_none());
        assert_eq!(state.next_stage(), Some(Stage::Convert));
        assert_eq!(state.progress, FETCH_DONE);
    }
}
