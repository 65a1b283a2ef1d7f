//! Subtree moves: rename a document and its topic descendants, leaving redirects behind.

pub mod redirect;

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::collections::{HashMap, HashSet};

use crate::db::{self, Repository};
use crate::errors::AppError;
use crate::models::{document_url, Document, DocumentSummary, NewRevision};
use crate::revisions::create_revision_in;
use crate::tree::{cascade_category, descendants_in, prepare_for_save, validate_slug};

use redirect::redirect_html;

/// Attempts at finding a free "<Title> Redirect N" title.
const MAX_REDIRECT_TITLE_ATTEMPTS: u32 = 10;

/// Prefix for temporary slugs held while a move swaps slugs around.
const PARKING_PREFIX: &str = "__moving__";

/// One document's slug before and after a move.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlugChange {
    pub document_id: i64,
    pub locale: String,
    pub old_slug: String,
    pub new_slug: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveReport {
    pub moved: Vec<SlugChange>,
    pub redirects: Vec<DocumentSummary>,
}

#[derive(Clone)]
pub struct Mover {
    repo: Repository,
    default_locale: String,
}

impl Mover {
    pub fn new(repo: Repository, default_locale: impl Into<String>) -> Self {
        Self {
            repo,
            default_locale: default_locale.into(),
        }
    }

    /// Live documents a move of `id` to `new_slug` would overwrite.
    pub async fn tree_conflicts(
        &self,
        id: i64,
        new_slug: &str,
    ) -> Result<Vec<DocumentSummary>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let root = db::require_document(&mut conn, id).await?;
        check_target(&root, new_slug)?;
        let descendants = descendants_in(&mut conn, id, None).await?;
        let changes = plan_slugs(&root, &descendants, new_slug);
        tree_conflicts_in(&mut conn, &changes).await
    }

    /// Move `id` and its topic descendants to `new_slug` in one transaction.
    pub async fn move_tree(
        &self,
        id: i64,
        new_slug: &str,
        user: &str,
    ) -> Result<MoveReport, AppError> {
        if user.trim().is_empty() {
            return Err(AppError::Validation("Moving user is required".to_string()));
        }

        let mut tx = self.repo.begin().await?;
        let root = db::require_document(&mut tx, id).await?;
        check_target(&root, new_slug)?;

        let descendants = descendants_in(&mut tx, id, None).await?;
        let changes = plan_slugs(&root, &descendants, new_slug);

        let conflicts = tree_conflicts_in(&mut tx, &changes).await?;
        if !conflicts.is_empty() {
            tracing::info!(
                "Refusing to move document {} to {}: {} conflict(s)",
                id,
                new_slug,
                conflicts.len()
            );
            return Err(AppError::MoveConflict { conflicts });
        }

        // Redirects sitting on target slugs have already been vetted as disposable.
        let moving: HashSet<i64> = changes.iter().map(|c| c.document_id).collect();
        for change in &changes {
            if let Some(existing) =
                db::fetch_document_by_slug(&mut tx, &change.locale, &change.new_slug).await?
            {
                if !moving.contains(&existing.id) {
                    tracing::debug!("Removing redirect {} at {}", existing.id, existing.url());
                    db::delete_document(&mut tx, existing.id).await?;
                }
            }
        }

        for change in &changes {
            let parked = format!("{}/{}", PARKING_PREFIX, change.document_id);
            db::set_document_slug(&mut tx, change.document_id, &parked).await?;
        }
        for change in &changes {
            db::set_document_slug(&mut tx, change.document_id, &change.new_slug).await?;
        }

        self.reparent_root(&mut tx, id, new_slug).await?;

        for change in &changes {
            record_move_revision(&mut tx, change, user).await?;
        }

        let taken: HashSet<(&str, &str)> = changes
            .iter()
            .map(|c| (c.locale.as_str(), c.new_slug.as_str()))
            .collect();
        let mut redirects = Vec::new();
        for change in &changes {
            if taken.contains(&(change.locale.as_str(), change.old_slug.as_str())) {
                continue;
            }
            let redirect = create_redirect(&mut tx, change, user).await?;
            redirects.push(redirect.summary());
        }

        tx.commit().await?;

        tracing::info!(
            "Moved document {} to {} ({} document(s), {} redirect(s))",
            id,
            new_slug,
            changes.len(),
            redirects.len()
        );
        Ok(MoveReport {
            moved: changes,
            redirects,
        })
    }

    /// Attach the moved root under the live document at its new parent path, if any.
    async fn reparent_root(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        new_slug: &str,
    ) -> Result<(), AppError> {
        let mut root = db::require_document(conn, id).await?;
        let parent_topic_id = match new_slug.rsplit_once('/') {
            Some((parent_path, _)) => db::fetch_document_by_slug(conn, &root.locale, parent_path)
                .await?
                .filter(|parent| !parent.is_redirect)
                .map(|parent| parent.id),
            None => None,
        };

        root.parent_topic_id = parent_topic_id;
        prepare_for_save(conn, &mut root, &self.default_locale).await?;
        let root = db::update_document(conn, &root).await?;
        cascade_category(conn, root.id, root.category).await
    }
}

fn check_target(root: &Document, new_slug: &str) -> Result<(), AppError> {
    validate_slug(new_slug)?;
    if new_slug == root.slug {
        return Err(AppError::Validation(format!(
            "Document {} is already at {}",
            root.id, new_slug
        )));
    }
    if new_slug.starts_with(&format!("{}/", root.slug)) {
        return Err(AppError::Validation(format!(
            "Cannot move {} underneath itself",
            root.slug
        )));
    }
    if new_slug.starts_with(PARKING_PREFIX) {
        return Err(AppError::Validation(format!(
            "Slugs starting with {} are reserved",
            PARKING_PREFIX
        )));
    }
    Ok(())
}

/// Replace `old_prefix` with `new_prefix` when `slug` is `old_prefix` itself or lies
/// beneath it at a segment boundary.
pub fn replace_slug_prefix(slug: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if slug == old_prefix {
        return Some(new_prefix.to_string());
    }
    slug.strip_prefix(old_prefix)
        .filter(|rest| rest.starts_with('/'))
        .map(|rest| format!("{}{}", new_prefix, rest))
}

fn last_segment(slug: &str) -> &str {
    slug.rsplit('/').next().unwrap_or(slug)
}

/// Old and new slug for the root and every descendant. `descendants` must be in
/// pre-order so each parent is planned before its children.
pub fn plan_slugs(root: &Document, descendants: &[Document], new_slug: &str) -> Vec<SlugChange> {
    let mut planned: HashMap<i64, String> = HashMap::new();
    planned.insert(root.id, new_slug.to_string());

    let mut changes = vec![SlugChange {
        document_id: root.id,
        locale: root.locale.clone(),
        old_slug: root.slug.clone(),
        new_slug: new_slug.to_string(),
    }];

    for doc in descendants {
        let target = replace_slug_prefix(&doc.slug, &root.slug, new_slug).unwrap_or_else(|| {
            let parent_slug = doc
                .parent_topic_id
                .and_then(|id| planned.get(&id))
                .map(String::as_str)
                .unwrap_or(new_slug);
            format!("{}/{}", parent_slug, last_segment(&doc.slug))
        });
        planned.insert(doc.id, target.clone());
        changes.push(SlugChange {
            document_id: doc.id,
            locale: doc.locale.clone(),
            old_slug: doc.slug.clone(),
            new_slug: target,
        });
    }
    changes
}

/// Documents that block the planned targets: live documents the move may not
/// overwrite, and moving documents whose planned slugs collide with each other.
async fn tree_conflicts_in(
    conn: &mut SqliteConnection,
    changes: &[SlugChange],
) -> Result<Vec<DocumentSummary>, AppError> {
    let moving: HashSet<i64> = changes.iter().map(|c| c.document_id).collect();
    let mut claims: HashMap<(&str, &str), usize> = HashMap::new();
    for change in changes {
        *claims
            .entry((change.locale.as_str(), change.new_slug.as_str()))
            .or_default() += 1;
    }

    let mut conflicts = Vec::new();
    let mut reported = HashSet::new();

    for change in changes {
        let target = (change.locale.as_str(), change.new_slug.as_str());
        if claims.get(&target).copied().unwrap_or(0) > 1 && reported.insert(change.document_id) {
            let colliding = db::require_document(conn, change.document_id).await?;
            conflicts.push(colliding.summary());
        }

        let Some(existing) =
            db::fetch_document_by_slug(conn, &change.locale, &change.new_slug).await?
        else {
            continue;
        };
        if moving.contains(&existing.id) || reported.contains(&existing.id) {
            continue;
        }
        if existing.is_redirect {
            let (translations, children) = db::count_dependents(conn, existing.id).await?;
            if translations == 0 && children == 0 {
                continue;
            }
        }
        reported.insert(existing.id);
        conflicts.push(existing.summary());
    }
    Ok(conflicts)
}

/// New approved revision on a moved document carrying its current content forward.
async fn record_move_revision(
    conn: &mut SqliteConnection,
    change: &SlugChange,
    user: &str,
) -> Result<(), AppError> {
    let doc = db::require_document(conn, change.document_id).await?;
    let Some(current_id) = doc.current_revision_id else {
        return Ok(());
    };
    let Some(current) = db::fetch_revision(conn, current_id).await? else {
        return Ok(());
    };

    let revision = NewRevision {
        content: current.content,
        creator: user.to_string(),
        title: Some(current.title),
        slug: Some(change.new_slug.clone()),
        tags: current.tags,
        review_tags: current.review_tags,
        comment: format!("Moved from {} to {}", change.old_slug, change.new_slug),
        is_approved: true,
        based_on_id: current.based_on_id,
        significance: None,
    };
    create_revision_in(conn, &doc, revision).await?;
    Ok(())
}

/// Redirect document at the vacated slug pointing at the moved document.
async fn create_redirect(
    conn: &mut SqliteConnection,
    change: &SlugChange,
    user: &str,
) -> Result<Document, AppError> {
    let moved = db::require_document(conn, change.document_id).await?;
    let title = redirect_title(conn, &change.locale, &moved.title).await?;

    let mut redirect = Document::draft(change.locale.clone(), change.old_slug.clone(), title);
    redirect.is_localizable = false;
    let redirect = db::insert_document(conn, &redirect).await?;

    let revision = NewRevision {
        content: redirect_html(&document_url(&change.locale, &change.new_slug), &moved.title),
        creator: user.to_string(),
        comment: format!("Redirect after moving to {}", change.new_slug),
        is_approved: true,
        ..Default::default()
    };
    create_revision_in(conn, &redirect, revision).await?;
    db::require_document(conn, redirect.id).await
}

async fn redirect_title(
    conn: &mut SqliteConnection,
    locale: &str,
    title: &str,
) -> Result<String, AppError> {
    for n in 1..=MAX_REDIRECT_TITLE_ATTEMPTS {
        let candidate = format!("{} Redirect {}", title, n);
        if !db::title_taken(conn, locale, &candidate).await? {
            return Ok(candidate);
        }
    }
    Err(AppError::Internal(format!(
        "No free redirect title for {:?} after {} attempts",
        title, MAX_REDIRECT_TITLE_ATTEMPTS
    )))
}
