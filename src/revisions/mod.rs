//! Revision store: append-only document content with approval and review state.
//!
//! The connection-level functions here are shared with the tree and mover, which create
//! revisions inside their own transactions.

use chrono::Utc;
use sqlx::sqlite::SqliteConnection;

use crate::db::{self, Repository, RevisionFilter};
use crate::errors::AppError;
use crate::models::{
    Document, NewRevision, Revision, RevisionPick, SavedRevision, Significance,
};
use crate::mover::redirect::is_redirect_content;

/// Service facade over revision persistence.
#[derive(Clone)]
pub struct RevisionStore {
    repo: Repository,
}

impl RevisionStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create a revision for a document, promoting it when approved.
    pub async fn create_revision(
        &self,
        document_id: i64,
        new_revision: NewRevision,
    ) -> Result<SavedRevision, AppError> {
        let mut tx = self.repo.begin().await?;
        let document = db::require_document(&mut tx, document_id).await?;
        let saved = create_revision_in(&mut tx, &document, new_revision).await?;
        tx.commit().await?;
        Ok(saved)
    }

    /// Record a review decision and promote the revision if it is now approved.
    pub async fn review_revision(
        &self,
        revision_id: i64,
        approve: bool,
        reviewer: &str,
    ) -> Result<SavedRevision, AppError> {
        if reviewer.trim().is_empty() {
            return Err(AppError::Validation("Reviewer is required".to_string()));
        }

        let mut tx = self.repo.begin().await?;
        db::mark_reviewed(&mut tx, revision_id, approve, reviewer, Utc::now()).await?;
        let revision = require_revision(&mut tx, revision_id).await?;
        let promoted = promote_if_approved(&mut tx, &revision).await?;
        tx.commit().await?;

        tracing::info!(
            "Revision {} reviewed by {} (approved: {})",
            revision_id,
            reviewer,
            approve
        );
        Ok(SavedRevision { revision, promoted })
    }

    pub async fn get_revision(&self, id: i64) -> Result<Revision, AppError> {
        self.repo
            .get_revision(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Revision {} not found", id)))
    }

    pub async fn list_revisions(&self, document_id: i64) -> Result<Vec<Revision>, AppError> {
        let mut conn = self.repo.acquire().await?;
        db::require_document(&mut conn, document_id).await?;
        db::list_revisions(&mut conn, document_id).await
    }

    /// Best available revision, tagged with the tier of the fallback chain that produced it.
    pub async fn get_current_or_latest(
        &self,
        document_id: i64,
        reviewed_only: bool,
    ) -> Result<RevisionPick, AppError> {
        let mut conn = self.repo.acquire().await?;
        let document = db::require_document(&mut conn, document_id).await?;

        if let Some(current_id) = document.current_revision_id {
            if let Some(rev) = db::fetch_revision(&mut conn, current_id).await? {
                return Ok(RevisionPick::Current(rev));
            }
        }
        if let Some(rev) = db::latest_revision(&mut conn, document_id, RevisionFilter::Approved).await? {
            return Ok(RevisionPick::LatestApproved(rev));
        }
        if reviewed_only {
            return Ok(RevisionPick::None);
        }
        if let Some(rev) = db::latest_revision(&mut conn, document_id, RevisionFilter::Reviewed).await? {
            return Ok(RevisionPick::LatestReviewed(rev));
        }
        if let Some(rev) = db::latest_revision(&mut conn, document_id, RevisionFilter::Any).await? {
            return Ok(RevisionPick::LatestAny(rev));
        }
        Ok(RevisionPick::None)
    }

    /// Whether the translation parent gained a major approved change since this
    /// translation's current revision was based on it.
    pub async fn is_majorly_outdated(&self, document_id: i64) -> Result<bool, AppError> {
        let mut conn = self.repo.acquire().await?;
        let document = db::require_document(&mut conn, document_id).await?;

        let (Some(parent_id), Some(current_id)) = (document.parent_id, document.current_revision_id)
        else {
            return Ok(false);
        };
        let parent = db::require_document(&mut conn, parent_id).await?;
        if parent.current_revision_id.is_none() {
            return Ok(false);
        }

        let current = require_revision(&mut conn, current_id).await?;
        let based_on = match current.based_on_id {
            Some(id) => db::fetch_revision(&mut conn, id).await?,
            None => None,
        };

        let majors =
            db::list_significant_revisions(&mut conn, parent_id, Significance::Major).await?;
        Ok(majors.iter().any(|rev| match &based_on {
            Some(base) => (rev.created, rev.id) > (base.created, base.id),
            None => true,
        }))
    }
}

pub async fn require_revision(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Revision, AppError> {
    db::fetch_revision(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Revision {} not found", id)))
}

/// Insert a revision for `document` and promote it if approved.
pub async fn create_revision_in(
    conn: &mut SqliteConnection,
    document: &Document,
    new_revision: NewRevision,
) -> Result<SavedRevision, AppError> {
    if new_revision.content.trim().is_empty() {
        return Err(AppError::Validation("Revision content is required".to_string()));
    }
    if new_revision.creator.trim().is_empty() {
        return Err(AppError::Validation("Revision creator is required".to_string()));
    }

    let based_on_id = resolve_based_on(conn, document, new_revision.based_on_id).await?;

    let revision = Revision {
        id: 0,
        document_id: document.id,
        title: new_revision.title.unwrap_or_else(|| document.title.clone()),
        slug: new_revision.slug.unwrap_or_else(|| document.slug.clone()),
        content: new_revision.content,
        tags: new_revision.tags,
        review_tags: new_revision.review_tags,
        is_approved: new_revision.is_approved,
        creator: new_revision.creator,
        created: Utc::now(),
        reviewed: None,
        reviewer: None,
        comment: new_revision.comment,
        based_on_id,
        significance: new_revision.significance,
    };

    let revision = db::insert_revision(conn, &revision).await?;
    let promoted = promote_if_approved(conn, &revision).await?;
    Ok(SavedRevision { revision, promoted })
}

/// Make `revision` current if it is approved and newer than the current one.
pub async fn promote_if_approved(
    conn: &mut SqliteConnection,
    revision: &Revision,
) -> Result<bool, AppError> {
    if !revision.is_approved {
        return Ok(false);
    }

    let promoted =
        db::promote_revision(conn, revision, is_redirect_content(&revision.content)).await?;
    if promoted {
        tracing::info!(
            "Revision {} is now current for document {}",
            revision.id,
            revision.document_id
        );
    } else {
        tracing::debug!(
            "Revision {} not promoted; document {} has a newer current revision",
            revision.id,
            revision.document_id
        );
    }
    Ok(promoted)
}

async fn resolve_based_on(
    conn: &mut SqliteConnection,
    document: &Document,
    requested: Option<i64>,
) -> Result<Option<i64>, AppError> {
    let Some(parent_id) = document.parent_id else {
        return Ok(None);
    };
    let parent = db::require_document(conn, parent_id).await?;

    let Some(requested_id) = requested else {
        return Ok(parent.current_revision_id);
    };

    match db::fetch_revision(conn, requested_id).await? {
        Some(rev) if rev.document_id == parent_id => Ok(Some(requested_id)),
        _ => {
            let suggestion = parent
                .current_revision_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".to_string());
            Err(AppError::Validation(format!(
                "based_on revision {} does not belong to parent document {}; use {}",
                requested_id, parent_id, suggestion
            )))
        }
    }
}
