//! SQL migration definitions for the article database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: statutes, articles, narration_cleanup",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per statute ever committed
CREATE TABLE IF NOT EXISTS statutes (
    id            TEXT PRIMARY KEY,
    article_count INTEGER NOT NULL,
    updated_at    TEXT NOT NULL
);

-- Current snapshot of each statute; replaced wholesale on commit
CREATE TABLE IF NOT EXISTS articles (
    id            TEXT PRIMARY KEY,
    statute_id    TEXT NOT NULL REFERENCES statutes(id) ON DELETE CASCADE,
    number        TEXT NOT NULL,
    content       TEXT NOT NULL,
    content_hash  TEXT NOT NULL,
    ord           INTEGER NOT NULL,
    kind          TEXT NOT NULL,
    narration_url TEXT,
    UNIQUE(statute_id, number)
);

CREATE INDEX IF NOT EXISTS idx_articles_statute ON articles(statute_id, ord);

-- Narration assets made stale or orphaned by a commit, awaiting deletion
CREATE TABLE IF NOT EXISTS narration_cleanup (
    id             TEXT PRIMARY KEY,
    statute_id     TEXT NOT NULL,
    article_number TEXT NOT NULL,
    url            TEXT NOT NULL,
    action         TEXT NOT NULL,
    reason         TEXT NOT NULL,
    queued_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cleanup_statute ON narration_cleanup(statute_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
