//! Database repository for documents and revisions.
//!
//! Row-level operations take a `&mut SqliteConnection` so the services can compose them inside
//! a single transaction; `Repository` wraps the pool for one-shot reads.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::errors::AppError;
use crate::models::{
    Category, Document, RenderError, RenderedContent, Revision, Significance,
};

const DOCUMENT_COLUMNS: &str = "id, locale, slug, title, category, parent_id, parent_topic_id, \
    current_revision_id, is_localizable, is_redirect, html, rendered_html, rendered_errors, \
    render_started_at, render_scheduled_at, last_rendered_at, defer_rendering, json, modified, \
    version";

const REVISION_COLUMNS: &str = "id, document_id, title, slug, content, tags, review_tags, \
    is_approved, creator, created, reviewed, reviewer, comment, based_on_id, significance";

/// Database repository wrapping the connection pool.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, AppError> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.pool.begin().await?)
    }

    /// Get a document by ID.
    pub async fn get_document(&self, id: i64) -> Result<Option<Document>, AppError> {
        let mut conn = self.acquire().await?;
        fetch_document(&mut conn, id).await
    }

    /// Get a document by ID or fail with `NotFound`.
    pub async fn require_document(&self, id: i64) -> Result<Document, AppError> {
        self.get_document(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))
    }

    /// Get a document by locale and slug.
    pub async fn get_document_by_slug(
        &self,
        locale: &str,
        slug: &str,
    ) -> Result<Option<Document>, AppError> {
        let mut conn = self.acquire().await?;
        fetch_document_by_slug(&mut conn, locale, slug).await
    }

    /// Get a revision by ID.
    pub async fn get_revision(&self, id: i64) -> Result<Option<Revision>, AppError> {
        let mut conn = self.acquire().await?;
        fetch_revision(&mut conn, id).await
    }
}

/// Which revisions a "latest" lookup considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionFilter {
    Approved,
    Reviewed,
    Any,
}

// ==================== DOCUMENT OPERATIONS ====================

pub async fn fetch_document(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Document>, AppError> {
    let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(document_from_row))
}

pub async fn require_document(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Document, AppError> {
    fetch_document(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))
}

pub async fn fetch_document_by_slug(
    conn: &mut SqliteConnection,
    locale: &str,
    slug: &str,
) -> Result<Option<Document>, AppError> {
    let sql = format!(
        "SELECT {} FROM documents WHERE locale = ? AND slug = ?",
        DOCUMENT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(locale)
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(document_from_row))
}

/// Insert a new document row; render state and content pointers start empty.
pub async fn insert_document(
    conn: &mut SqliteConnection,
    doc: &Document,
) -> Result<Document, AppError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"INSERT INTO documents (
            locale, slug, title, category, parent_id, parent_topic_id,
            is_localizable, is_redirect, defer_rendering, modified, version
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"#,
    )
    .bind(&doc.locale)
    .bind(&doc.slug)
    .bind(&doc.title)
    .bind(doc.category.code())
    .bind(doc.parent_id)
    .bind(doc.parent_topic_id)
    .bind(doc.is_localizable as i32)
    .bind(doc.is_redirect as i32)
    .bind(doc.defer_rendering as i32)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    require_document(conn, result.last_insert_rowid()).await
}

/// Update document metadata with optimistic concurrency control.
pub async fn update_document(
    conn: &mut SqliteConnection,
    doc: &Document,
) -> Result<Document, AppError> {
    let result = sqlx::query(
        r#"UPDATE documents SET
            slug = ?, title = ?, category = ?, parent_id = ?, parent_topic_id = ?,
            is_localizable = ?, defer_rendering = ?, modified = ?, version = version + 1
        WHERE id = ? AND version = ?"#,
    )
    .bind(&doc.slug)
    .bind(&doc.title)
    .bind(doc.category.code())
    .bind(doc.parent_id)
    .bind(doc.parent_topic_id)
    .bind(doc.is_localizable as i32)
    .bind(doc.defer_rendering as i32)
    .bind(Utc::now())
    .bind(doc.id)
    .bind(doc.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let current = fetch_document(conn, doc.id).await?;
        return match current {
            Some(current) => Err(AppError::VersionMismatch {
                message: format!("Concurrent modification detected for document {}", doc.id),
                current_version: current.version,
            }),
            None => Err(AppError::NotFound(format!("Document {} not found", doc.id))),
        };
    }

    require_document(conn, doc.id).await
}

pub async fn set_document_slug(
    conn: &mut SqliteConnection,
    id: i64,
    slug: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE documents SET slug = ?, modified = ?, version = version + 1 WHERE id = ?",
    )
    .bind(slug)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_document_category(
    conn: &mut SqliteConnection,
    id: i64,
    category: Category,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE documents SET category = ?, modified = ?, version = version + 1 WHERE id = ?",
    )
    .bind(category.code())
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Topic children ordered by creation.
pub async fn list_topic_children(
    conn: &mut SqliteConnection,
    parent_topic_id: i64,
) -> Result<Vec<Document>, AppError> {
    let sql = format!(
        "SELECT {} FROM documents WHERE parent_topic_id = ? ORDER BY id",
        DOCUMENT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(parent_topic_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().map(document_from_row).collect())
}

/// Translations of a source document, ordered by locale.
pub async fn list_translations(
    conn: &mut SqliteConnection,
    parent_id: i64,
) -> Result<Vec<Document>, AppError> {
    let sql = format!(
        "SELECT {} FROM documents WHERE parent_id = ? ORDER BY locale, id",
        DOCUMENT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(parent_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().map(document_from_row).collect())
}

pub async fn find_translation(
    conn: &mut SqliteConnection,
    parent_id: i64,
    locale: &str,
) -> Result<Option<Document>, AppError> {
    let sql = format!(
        "SELECT {} FROM documents WHERE parent_id = ? AND locale = ? ORDER BY id LIMIT 1",
        DOCUMENT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(parent_id)
        .bind(locale)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(document_from_row))
}

/// Number of translations and topic children pointing at a document.
pub async fn count_dependents(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<(i64, i64), AppError> {
    let row = sqlx::query(
        r#"SELECT
            (SELECT COUNT(*) FROM documents WHERE parent_id = ?) AS translations,
            (SELECT COUNT(*) FROM documents WHERE parent_topic_id = ?) AS children"#,
    )
    .bind(id)
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    Ok((row.get("translations"), row.get("children")))
}

pub async fn title_taken(
    conn: &mut SqliteConnection,
    locale: &str,
    title: &str,
) -> Result<bool, AppError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE locale = ? AND title = ?")
        .bind(locale)
        .bind(title)
        .fetch_one(&mut *conn)
        .await?;
    let n: i64 = row.get("n");
    Ok(n > 0)
}

/// Delete a document and its revisions. Callers check for dependents first.
pub async fn delete_document(conn: &mut SqliteConnection, id: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE documents SET current_revision_id = NULL WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM revisions WHERE document_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Document {} not found", id)));
    }
    Ok(())
}

// ==================== RENDER STATE OPERATIONS ====================

/// Take the render lock if the row is still at `version`.
pub async fn claim_render(
    conn: &mut SqliteConnection,
    id: i64,
    version: i64,
    started_at: DateTime<Utc>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE documents SET render_started_at = ?, version = version + 1 WHERE id = ? AND version = ?",
    )
    .bind(started_at)
    .bind(id)
    .bind(version)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_render_scheduled(
    conn: &mut SqliteConnection,
    id: i64,
    scheduled_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE documents SET render_scheduled_at = ?, version = version + 1 WHERE id = ?",
    )
    .bind(scheduled_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Store render output and release the lock. `force_defer` only ever sets the flag.
pub async fn complete_render(
    conn: &mut SqliteConnection,
    id: i64,
    content: &RenderedContent,
    finished_at: DateTime<Utc>,
    force_defer: bool,
    json: &serde_json::Value,
) -> Result<(), AppError> {
    let errors_json = serde_json::to_string(&content.errors)?;
    let summary_json = serde_json::to_string(json)?;

    sqlx::query(
        r#"UPDATE documents SET
            rendered_html = ?, rendered_errors = ?, last_rendered_at = ?,
            render_started_at = NULL, defer_rendering = MAX(defer_rendering, ?),
            json = ?, version = version + 1
        WHERE id = ?"#,
    )
    .bind(&content.html)
    .bind(&errors_json)
    .bind(finished_at)
    .bind(force_defer as i32)
    .bind(&summary_json)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn release_render(conn: &mut SqliteConnection, id: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE documents SET render_started_at = NULL, version = version + 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ==================== REVISION OPERATIONS ====================

pub async fn fetch_revision(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Revision>, AppError> {
    let sql = format!("SELECT {} FROM revisions WHERE id = ?", REVISION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(revision_from_row))
}

pub async fn insert_revision(
    conn: &mut SqliteConnection,
    rev: &Revision,
) -> Result<Revision, AppError> {
    let tags_json = serde_json::to_string(&rev.tags)?;
    let review_tags_json = serde_json::to_string(&rev.review_tags)?;

    let result = sqlx::query(
        r#"INSERT INTO revisions (
            document_id, title, slug, content, tags, review_tags, is_approved,
            creator, created, reviewed, reviewer, comment, based_on_id, significance
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(rev.document_id)
    .bind(&rev.title)
    .bind(&rev.slug)
    .bind(&rev.content)
    .bind(&tags_json)
    .bind(&review_tags_json)
    .bind(rev.is_approved as i32)
    .bind(&rev.creator)
    .bind(rev.created)
    .bind(rev.reviewed)
    .bind(&rev.reviewer)
    .bind(&rev.comment)
    .bind(rev.based_on_id)
    .bind(rev.significance.map(|s| s.code()))
    .execute(&mut *conn)
    .await?;

    Ok(Revision {
        id: result.last_insert_rowid(),
        ..rev.clone()
    })
}

/// Point the document at `rev` unless it already points at a later revision.
pub async fn promote_revision(
    conn: &mut SqliteConnection,
    rev: &Revision,
    is_redirect: bool,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"UPDATE documents SET
            current_revision_id = ?, title = ?, html = ?, is_redirect = ?,
            modified = ?, version = version + 1
        WHERE id = ? AND (current_revision_id IS NULL OR current_revision_id < ?)"#,
    )
    .bind(rev.id)
    .bind(&rev.title)
    .bind(&rev.content)
    .bind(is_redirect as i32)
    .bind(Utc::now())
    .bind(rev.document_id)
    .bind(rev.id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_reviewed(
    conn: &mut SqliteConnection,
    id: i64,
    approve: bool,
    reviewer: &str,
    reviewed_at: DateTime<Utc>,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE revisions SET is_approved = ?, reviewer = ?, reviewed = ? WHERE id = ?",
    )
    .bind(approve as i32)
    .bind(reviewer)
    .bind(reviewed_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Revision {} not found", id)));
    }
    Ok(())
}

/// Most recent revision of a document matching `filter`.
pub async fn latest_revision(
    conn: &mut SqliteConnection,
    document_id: i64,
    filter: RevisionFilter,
) -> Result<Option<Revision>, AppError> {
    let condition = match filter {
        RevisionFilter::Approved => "AND is_approved = 1",
        RevisionFilter::Reviewed => "AND reviewed IS NOT NULL",
        RevisionFilter::Any => "",
    };
    let sql = format!(
        "SELECT {} FROM revisions WHERE document_id = ? {} ORDER BY created DESC, id DESC LIMIT 1",
        REVISION_COLUMNS, condition
    );
    let row = sqlx::query(&sql)
        .bind(document_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(revision_from_row))
}

/// All revisions of a document, newest first.
pub async fn list_revisions(
    conn: &mut SqliteConnection,
    document_id: i64,
) -> Result<Vec<Revision>, AppError> {
    let sql = format!(
        "SELECT {} FROM revisions WHERE document_id = ? ORDER BY created DESC, id DESC",
        REVISION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(document_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().map(revision_from_row).collect())
}

/// Approved revisions of a document at or above `min` significance.
pub async fn list_significant_revisions(
    conn: &mut SqliteConnection,
    document_id: i64,
    min: Significance,
) -> Result<Vec<Revision>, AppError> {
    let sql = format!(
        "SELECT {} FROM revisions WHERE document_id = ? AND is_approved = 1 AND significance >= ? ORDER BY id",
        REVISION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(document_id)
        .bind(min.code())
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().map(revision_from_row).collect())
}

// Helper functions for row conversion

fn document_from_row(row: &SqliteRow) -> Document {
    let category: i64 = row.get("category");
    let is_localizable: i32 = row.get("is_localizable");
    let is_redirect: i32 = row.get("is_redirect");
    let defer_rendering: i32 = row.get("defer_rendering");
    let rendered_errors: Option<String> = row.get("rendered_errors");
    let json: Option<String> = row.get("json");

    Document {
        id: row.get("id"),
        locale: row.get("locale"),
        slug: row.get("slug"),
        title: row.get("title"),
        category: Category::try_from(category).unwrap_or_default(),
        parent_id: row.get("parent_id"),
        parent_topic_id: row.get("parent_topic_id"),
        current_revision_id: row.get("current_revision_id"),
        is_localizable: is_localizable != 0,
        is_redirect: is_redirect != 0,
        html: row.get("html"),
        rendered_html: row.get("rendered_html"),
        rendered_errors: rendered_errors
            .map(|s| parse_render_errors(&s))
            .unwrap_or_default(),
        render_started_at: row.get("render_started_at"),
        render_scheduled_at: row.get("render_scheduled_at"),
        last_rendered_at: row.get("last_rendered_at"),
        defer_rendering: defer_rendering != 0,
        json: json.and_then(|s| serde_json::from_str(&s).ok()),
        modified: row.get("modified"),
        version: row.get("version"),
    }
}

fn revision_from_row(row: &SqliteRow) -> Revision {
    let is_approved: i32 = row.get("is_approved");
    let tags: Option<String> = row.get("tags");
    let review_tags: Option<String> = row.get("review_tags");
    let significance: Option<i64> = row.get("significance");

    Revision {
        id: row.get("id"),
        document_id: row.get("document_id"),
        title: row.get("title"),
        slug: row.get("slug"),
        content: row.get("content"),
        tags: tags.map(|s| parse_json_array(&s)).unwrap_or_default(),
        review_tags: review_tags.map(|s| parse_json_array(&s)).unwrap_or_default(),
        is_approved: is_approved != 0,
        creator: row.get("creator"),
        created: row.get("created"),
        reviewed: row.get("reviewed"),
        reviewer: row.get("reviewer"),
        comment: row.get("comment"),
        based_on_id: row.get("based_on_id"),
        significance: significance.and_then(|code| Significance::try_from(code).ok()),
    }
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn parse_render_errors(s: &str) -> Vec<RenderError> {
    serde_json::from_str(s).unwrap_or_default()
}
