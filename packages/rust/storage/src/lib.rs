//! Turso Embedded / libSQL article store (offline mode).
//!
//! [`ArticleStore`] is the contract the pipeline commits through: per-statute
//! ordered article records with optional narration URLs and an atomic
//! whole-table replace. [`Storage`] implements it on a local libSQL file and
//! additionally keeps a queue of narration assets that a commit made stale.

mod migrations;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, TransactionBehavior, Value, params};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use statutesync_shared::{
    Article, ArticleKind, AssetAction, AssetDecision, Result, StatuteId, StatuteSyncError,
};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Everything one commit applies for a statute.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub statute_id: StatuteId,
    /// The new snapshot, replacing the stored one wholesale.
    pub articles: Vec<Article>,
    pub decisions: Vec<AssetDecision>,
    /// Queue narration of removed articles for deletion.
    pub delete_removed_audio: bool,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub inserted_count: usize,
    pub kept_audio_count: usize,
    pub removed_audio_count: usize,
}

/// Durable per-statute article storage.
#[allow(async_fn_in_trait)]
pub trait ArticleStore {
    /// The persisted snapshot of `statute`, in order. Empty if never committed.
    async fn load_articles(&self, statute: &StatuteId) -> Result<Vec<Article>>;

    /// Replace the statute's articles and apply asset decisions, all or nothing.
    async fn commit(&self, request: &CommitRequest) -> Result<CommitReport>;
}

impl<T: ArticleStore> ArticleStore for Arc<T> {
    async fn load_articles(&self, statute: &StatuteId) -> Result<Vec<Article>> {
        T::load_articles(self, statute).await
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitReport> {
        T::commit(self, request).await
    }
}

/// A narration asset awaiting deletion by the audio service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupItem {
    pub id: String,
    pub statute_id: String,
    pub article_number: String,
    pub url: String,
    pub action: String,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

/// One committed statute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatuteSummary {
    pub id: String,
    pub article_count: u32,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// libSQL implementation
// ---------------------------------------------------------------------------

/// How long a connection waits on another writer before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary storage handle wrapping a libSQL database.
///
/// Reads and queue maintenance share one connection. Every commit opens its
/// own, so concurrent commits never interleave inside one transaction.
pub struct Storage {
    db: Database,
    conn: Connection,
}

fn db_err(e: libsql::Error) -> StatuteSyncError {
    StatuteSyncError::Storage(e.to_string())
}

fn connect(db: &Database) -> Result<Connection> {
    let conn = db.connect().map_err(db_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
    Ok(conn)
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StatuteSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = connect(&db)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    StatuteSyncError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Statutes
    // -----------------------------------------------------------------------

    /// Every committed statute, by id.
    pub async fn list_statutes(&self) -> Result<Vec<StatuteSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, article_count, updated_at FROM statutes ORDER BY id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(StatuteSummary {
                id: row.get::<String>(0).map_err(db_err)?,
                article_count: row.get::<u32>(1).map_err(db_err)?,
                updated_at: parse_timestamp(&row.get::<String>(2).map_err(db_err)?)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Narration cleanup queue
    // -----------------------------------------------------------------------

    /// Narration assets queued for deletion for `statute`, oldest first.
    pub async fn pending_cleanup(&self, statute: &StatuteId) -> Result<Vec<CleanupItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, statute_id, article_number, url, action, reason, queued_at
                 FROM narration_cleanup WHERE statute_id = ?1 ORDER BY queued_at, id",
                params![statute.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(CleanupItem {
                id: row.get::<String>(0).map_err(db_err)?,
                statute_id: row.get::<String>(1).map_err(db_err)?,
                article_number: row.get::<String>(2).map_err(db_err)?,
                url: row.get::<String>(3).map_err(db_err)?,
                action: row.get::<String>(4).map_err(db_err)?,
                reason: row.get::<String>(5).map_err(db_err)?,
                queued_at: parse_timestamp(&row.get::<String>(6).map_err(db_err)?)?,
            });
        }
        Ok(results)
    }

    /// Mark a queued asset as deleted. Returns `false` if the id was unknown.
    pub async fn complete_cleanup(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM narration_cleanup WHERE id = ?1", params![id])
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }
}

impl ArticleStore for Storage {
    async fn load_articles(&self, statute: &StatuteId) -> Result<Vec<Article>> {
        let mut rows = self
            .conn
            .query(
                "SELECT number, content, ord, kind, narration_url
                 FROM articles WHERE statute_id = ?1 ORDER BY ord",
                params![statute.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_article(&row)?);
        }
        Ok(results)
    }

    #[instrument(skip_all, fields(statute = %request.statute_id, articles = request.articles.len()))]
    async fn commit(&self, request: &CommitRequest) -> Result<CommitReport> {
        let conn = connect(&self.db)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;

        match apply_commit(&tx, request).await {
            Ok(report) => {
                tx.commit()
                    .await
                    .map_err(|e| StatuteSyncError::Commit(e.to_string()))?;
                info!(
                    inserted = report.inserted_count,
                    kept_audio = report.kept_audio_count,
                    removed_audio = report.removed_audio_count,
                    "commit applied"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "commit failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(StatuteSyncError::Commit(e.to_string()))
            }
        }
    }
}

/// Apply one commit inside an open transaction.
async fn apply_commit(conn: &Connection, request: &CommitRequest) -> Result<CommitReport> {
    let statute = request.statute_id.as_str();
    let now = Utc::now().to_rfc3339();

    let kept: HashMap<&str, &str> = request
        .decisions
        .iter()
        .filter(|d| d.action == AssetAction::Keep)
        .filter_map(|d| Some((d.article_number.as_str(), d.url.as_deref()?)))
        .collect();

    let new_numbers: HashSet<&str> = request.articles.iter().map(|a| a.number.as_str()).collect();
    if let Some(orphan) = kept.keys().find(|n| !new_numbers.contains(*n)) {
        return Err(StatuteSyncError::validation(format!(
            "keep decision for {orphan} has no matching new article"
        )));
    }

    conn.execute(
        "INSERT INTO statutes (id, article_count, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
           article_count = excluded.article_count,
           updated_at = excluded.updated_at",
        params![statute, request.articles.len() as i64, now.as_str()],
    )
    .await
    .map_err(db_err)?;

    conn.execute("DELETE FROM articles WHERE statute_id = ?1", params![statute])
        .await
        .map_err(db_err)?;

    let mut report = CommitReport::default();
    for article in &request.articles {
        let narration = kept.get(article.number.as_str()).copied();
        conn.execute(
            "INSERT INTO articles (id, statute_id, number, content, content_hash, ord, kind, narration_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::now_v7().to_string(),
                statute,
                article.number.as_str(),
                article.content.as_str(),
                article.content_hash(),
                i64::from(article.order),
                article.kind.as_str(),
                narration,
            ],
        )
        .await
        .map_err(db_err)?;
        report.inserted_count += 1;
    }
    report.kept_audio_count = kept.len();

    for decision in &request.decisions {
        let queue = match decision.action {
            AssetAction::Keep => false,
            AssetAction::Regenerate => true,
            AssetAction::Delete => request.delete_removed_audio,
        };
        if !queue {
            continue;
        }
        conn.execute(
            "INSERT INTO narration_cleanup (id, statute_id, article_number, url, action, reason, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::now_v7().to_string(),
                statute,
                decision.article_number.as_str(),
                decision.previous_url.as_str(),
                decision.action.as_str(),
                decision.reason.as_str(),
                now.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;
        report.removed_audio_count += 1;
    }

    Ok(report)
}

fn row_to_article(row: &libsql::Row) -> Result<Article> {
    let kind_str: String = row.get(3).map_err(db_err)?;
    let kind = ArticleKind::from_str_opt(&kind_str)
        .ok_or_else(|| StatuteSyncError::Storage(format!("unknown article kind: {kind_str}")))?;

    Ok(Article {
        number: row.get::<String>(0).map_err(db_err)?,
        content: row.get::<String>(1).map_err(db_err)?,
        order: row.get::<u32>(2).map_err(db_err)?,
        kind,
        narration_url: match row.get_value(4).map_err(db_err)? {
            Value::Null => None,
            Value::Text(url) => Some(url),
            other => {
                return Err(StatuteSyncError::Storage(format!(
                    "invalid narration_url value: {other:?}"
                )));
            }
        },
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StatuteSyncError::Storage(format!("invalid date: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ss_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn art(number: &str, content: &str, order: u32) -> Article {
        Article::new(number, content, order, ArticleKind::Article)
    }

    fn request(articles: Vec<Article>, decisions: Vec<AssetDecision>) -> CommitRequest {
        CommitRequest {
            statute_id: StatuteId::new("codigo-penal"),
            articles,
            decisions,
            delete_removed_audio: true,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ss_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn unknown_statute_loads_empty() {
        let storage = test_storage().await;
        let articles = storage
            .load_articles(&StatuteId::new("nada"))
            .await
            .expect("load");
        assert!(articles.is_empty());
    }

    #[tokio::test]
    async fn commit_replaces_snapshot_and_carries_kept_audio() {
        let storage = test_storage().await;
        let id = StatuteId::new("codigo-penal");

        storage
            .commit(&request(
                vec![art("Art. 1", "texto A", 1), art("Art. 2", "texto B", 2)],
                vec![],
            ))
            .await
            .expect("first commit");

        let report = storage
            .commit(&request(
                vec![art("Art. 1", "texto A", 1), art("Art. 3", "texto C", 2)],
                vec![
                    AssetDecision::keep("Art. 1", "u1", 1),
                    AssetDecision::delete("Art. 2", "u2", "article removed"),
                ],
            ))
            .await
            .expect("second commit");

        assert_eq!(
            report,
            CommitReport {
                inserted_count: 2,
                kept_audio_count: 1,
                removed_audio_count: 1,
            }
        );

        let stored = storage.load_articles(&id).await.expect("load");
        let numbers: Vec<_> = stored.iter().map(|a| a.number.as_str()).collect();
        assert_eq!(numbers, vec!["Art. 1", "Art. 3"]);
        assert_eq!(stored[0].narration_url.as_deref(), Some("u1"));
        assert!(stored[1].narration_url.is_none());

        let queued = storage.pending_cleanup(&id).await.expect("cleanup");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].url, "u2");
        assert_eq!(queued[0].action, "delete");

        let statutes = storage.list_statutes().await.expect("list");
        assert_eq!(statutes.len(), 1);
        assert_eq!(statutes[0].article_count, 2);
    }

    #[tokio::test]
    async fn removed_audio_is_retained_when_deletion_disabled() {
        let storage = test_storage().await;
        let mut req = request(
            vec![art("Art. 2", "texto B modificada", 1)],
            vec![
                AssetDecision::regenerate("Art. 2", "u2"),
                AssetDecision::delete("Art. 9", "u9", "article removed"),
            ],
        );
        req.delete_removed_audio = false;

        let report = storage.commit(&req).await.expect("commit");
        assert_eq!(report.removed_audio_count, 1);

        let queued = storage
            .pending_cleanup(&req.statute_id)
            .await
            .expect("cleanup");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, "regenerate");

        assert!(storage.complete_cleanup(&queued[0].id).await.expect("complete"));
        assert!(!storage.complete_cleanup(&queued[0].id).await.expect("complete again"));
        assert!(storage.pending_cleanup(&req.statute_id).await.expect("cleanup").is_empty());
    }

    #[tokio::test]
    async fn failed_commit_rolls_back() {
        let storage = test_storage().await;
        let id = StatuteId::new("codigo-penal");
        storage
            .commit(&request(vec![art("Art. 1", "texto A", 1)], vec![]))
            .await
            .expect("seed");

        // Duplicate numbers violate UNIQUE(statute_id, number) mid-write.
        let err = storage
            .commit(&request(
                vec![art("Art. 7", "x", 1), art("Art. 7", "y", 2)],
                vec![AssetDecision::regenerate("Art. 1", "u1")],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StatuteSyncError::Commit(_)));

        let stored = storage.load_articles(&id).await.expect("load");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].number, "Art. 1");
        assert!(storage.pending_cleanup(&id).await.expect("cleanup").is_empty());
    }

    #[tokio::test]
    async fn narration_column_is_decoded_strictly() {
        let storage = test_storage().await;
        let id = StatuteId::new("codigo-penal");
        storage
            .commit(&request(
                vec![art("Art. 1", "texto A", 1), art("Art. 2", "texto B", 2)],
                vec![],
            ))
            .await
            .expect("seed");
        storage
            .conn
            .execute(
                "UPDATE articles SET narration_url = 'https://audio/1.mp3' WHERE number = 'Art. 1'",
                params![],
            )
            .await
            .expect("set narration");

        let stored = storage.load_articles(&id).await.expect("load");
        assert_eq!(stored[0].narration_url.as_deref(), Some("https://audio/1.mp3"));
        assert!(stored[1].narration_url.is_none());

        storage
            .conn
            .execute(
                "UPDATE articles SET narration_url = X'00FF' WHERE number = 'Art. 2'",
                params![],
            )
            .await
            .expect("corrupt narration");
        let err = storage.load_articles(&id).await.unwrap_err();
        assert!(matches!(err, StatuteSyncError::Storage(_)));
        assert!(err.to_string().contains("narration_url"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_commits_to_different_statutes() {
        let storage = Arc::new(test_storage().await);

        for round in 0..10 {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let storage = Arc::clone(&storage);
                    tokio::spawn(async move {
                        let request = CommitRequest {
                            statute_id: StatuteId::new(format!("s{i}")),
                            articles: vec![
                                art("Art. 1", &format!("rodada {round}"), 1),
                                art("Art. 2", "fixo", 2),
                            ],
                            decisions: vec![AssetDecision::regenerate(
                                "Art. 1",
                                format!("u{i}-{round}"),
                            )],
                            delete_removed_audio: true,
                        };
                        storage.commit(&request).await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.expect("join").expect("commit");
            }
        }

        for i in 0..4 {
            let id = StatuteId::new(format!("s{i}"));
            let stored = storage.load_articles(&id).await.expect("load");
            assert_eq!(stored.len(), 2);
            assert_eq!(stored[0].content, "rodada 9");
            assert_eq!(storage.pending_cleanup(&id).await.expect("cleanup").len(), 10);
        }
        assert_eq!(storage.list_statutes().await.expect("list").len(), 4);
    }

    #[tokio::test]
    async fn keep_without_target_is_rejected() {
        let storage = test_storage().await;
        let err = storage
            .commit(&request(
                vec![art("Art. 1", "texto A", 1)],
                vec![AssetDecision::keep("Art. 5", "u5", 2)],
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Art. 5"));
        assert!(storage.list_statutes().await.expect("list").is_empty());
    }
}
