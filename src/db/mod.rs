//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for documents, revisions and cached render state.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            locale TEXT NOT NULL,
            slug TEXT NOT NULL,
            title TEXT NOT NULL,
            category INTEGER NOT NULL DEFAULT 0,
            parent_id INTEGER REFERENCES documents(id) ON DELETE RESTRICT,
            parent_topic_id INTEGER REFERENCES documents(id) ON DELETE RESTRICT,
            current_revision_id INTEGER,
            is_localizable INTEGER NOT NULL DEFAULT 1,
            is_redirect INTEGER NOT NULL DEFAULT 0,
            html TEXT NOT NULL DEFAULT '',
            rendered_html TEXT NOT NULL DEFAULT '',
            rendered_errors TEXT,
            render_started_at TEXT,
            render_scheduled_at TEXT,
            last_rendered_at TEXT,
            defer_rendering INTEGER NOT NULL DEFAULT 0,
            json TEXT,
            modified TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (locale, slug)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT,
            review_tags TEXT,
            is_approved INTEGER NOT NULL DEFAULT 0,
            creator TEXT NOT NULL,
            created TEXT NOT NULL,
            reviewed TEXT,
            reviewer TEXT,
            comment TEXT NOT NULL DEFAULT '',
            based_on_id INTEGER REFERENCES revisions(id) ON DELETE SET NULL,
            significance INTEGER
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent_id);
        CREATE INDEX IF NOT EXISTS idx_documents_parent_topic ON documents(parent_topic_id);
        CREATE INDEX IF NOT EXISTS idx_documents_locale_title ON documents(locale, title);
        CREATE INDEX IF NOT EXISTS idx_revisions_document ON revisions(document_id, created);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
