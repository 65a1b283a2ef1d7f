//! Document tree: translation links (`parent`) and topic nesting (`parent_topic`).
//!
//! Every save goes through `prepare_for_save`, which enforces the localizability and
//! category rules before the row is written.

use serde_json::json;
use sqlx::sqlite::SqliteConnection;
use std::collections::HashSet;

use crate::db::{self, Repository};
use crate::errors::AppError;
use crate::models::{
    Category, CreateDocumentRequest, CreateTranslationRequest, Document, NewRevision,
    UpdateDocumentRequest,
};
use crate::mover::redirect::redirect_url;
use crate::revisions::create_revision_in;

/// Review tag placed on auto-created translation stubs.
pub const TRANSLATION_REVIEW_TAG: &str = "translation";

#[derive(Clone)]
pub struct DocumentTree {
    repo: Repository,
    default_locale: String,
}

impl DocumentTree {
    pub fn new(repo: Repository, default_locale: impl Into<String>) -> Self {
        Self {
            repo,
            default_locale: default_locale.into(),
        }
    }

    /// Create a document together with its first revision.
    pub async fn create_document(&self, request: CreateDocumentRequest) -> Result<Document, AppError> {
        validate_slug(&request.slug)?;
        validate_title(&request.title)?;

        let locale = request
            .locale
            .unwrap_or_else(|| self.default_locale.clone());
        let mut doc = Document::draft(locale, request.slug, request.title);
        if let Some(code) = request.category {
            doc.category = parse_category(code)?;
        }
        doc.parent_id = request.parent_id;
        doc.parent_topic_id = request.parent_topic_id;
        doc.is_localizable = request.is_localizable.unwrap_or(true);
        doc.defer_rendering = request.defer_rendering;

        let mut tx = self.repo.begin().await?;
        ensure_slug_free(&mut tx, &doc.locale, &doc.slug).await?;
        prepare_for_save(&mut tx, &mut doc, &self.default_locale).await?;
        let doc = db::insert_document(&mut tx, &doc).await?;
        create_revision_in(&mut tx, &doc, request.revision).await?;
        let doc = db::require_document(&mut tx, doc.id).await?;
        tx.commit().await?;

        tracing::info!("Created document {} at {}", doc.id, doc.url());
        Ok(doc)
    }

    /// Create a translation of `source_id`, deriving its topic parent when not given.
    pub async fn create_translation(
        &self,
        source_id: i64,
        request: CreateTranslationRequest,
    ) -> Result<Document, AppError> {
        validate_title(&request.title)?;

        let mut tx = self.repo.begin().await?;
        let source = db::require_document(&mut tx, source_id).await?;
        ensure_translation_free(&mut tx, source.id, &request.locale, None).await?;

        let slug = request.slug.unwrap_or_else(|| source.slug.clone());
        validate_slug(&slug)?;
        ensure_slug_free(&mut tx, &request.locale, &slug).await?;

        let parent_topic_id = match request.parent_topic_id {
            Some(id) => Some(id),
            None => {
                default_topic_parent_in(
                    &mut tx,
                    &source,
                    &request.locale,
                    &request.revision.creator,
                    &self.default_locale,
                )
                .await?
            }
        };

        let mut doc = Document::draft(request.locale, slug, request.title);
        doc.parent_id = Some(source.id);
        doc.parent_topic_id = parent_topic_id;
        doc.category = source.category;
        prepare_for_save(&mut tx, &mut doc, &self.default_locale).await?;
        let doc = db::insert_document(&mut tx, &doc).await?;
        create_revision_in(&mut tx, &doc, request.revision).await?;
        let doc = db::require_document(&mut tx, doc.id).await?;
        tx.commit().await?;

        tracing::info!("Created {} translation {} of document {}", doc.locale, doc.id, source.id);
        Ok(doc)
    }

    /// Update document metadata; a category change cascades down the topic tree.
    pub async fn update_document(
        &self,
        id: i64,
        request: UpdateDocumentRequest,
    ) -> Result<Document, AppError> {
        let mut tx = self.repo.begin().await?;
        let mut doc = db::require_document(&mut tx, id).await?;

        if let Some(expected) = request.expected_version {
            if expected != doc.version {
                return Err(AppError::VersionMismatch {
                    message: format!(
                        "Document {} was modified (expected version {}, found {})",
                        id, expected, doc.version
                    ),
                    current_version: doc.version,
                });
            }
        }

        if let Some(title) = request.title {
            validate_title(&title)?;
            doc.title = title;
        }
        if let Some(code) = request.category {
            doc.category = parse_category(code)?;
        }
        if let Some(is_localizable) = request.is_localizable {
            doc.is_localizable = is_localizable;
        }
        if let Some(defer) = request.defer_rendering {
            doc.defer_rendering = defer;
        }

        prepare_for_save(&mut tx, &mut doc, &self.default_locale).await?;
        let doc = db::update_document(&mut tx, &doc).await?;
        cascade_category(&mut tx, doc.id, doc.category).await?;
        tx.commit().await?;
        Ok(doc)
    }

    /// Move a document under a new topic parent, or detach it with `None`.
    pub async fn set_parent_topic(
        &self,
        id: i64,
        parent_topic_id: Option<i64>,
    ) -> Result<Document, AppError> {
        let mut tx = self.repo.begin().await?;
        let mut doc = db::require_document(&mut tx, id).await?;
        doc.parent_topic_id = parent_topic_id;
        prepare_for_save(&mut tx, &mut doc, &self.default_locale).await?;
        let doc = db::update_document(&mut tx, &doc).await?;
        cascade_category(&mut tx, doc.id, doc.category).await?;
        tx.commit().await?;
        Ok(doc)
    }

    /// Delete a leaf document. Documents with translations or topic children stay.
    pub async fn delete_document(&self, id: i64) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        db::require_document(&mut tx, id).await?;
        let (translations, children) = db::count_dependents(&mut tx, id).await?;
        if translations > 0 || children > 0 {
            return Err(AppError::Validation(format!(
                "Document {} has {} translation(s) and {} topic child(ren) and cannot be deleted",
                id, translations, children
            )));
        }
        db::delete_document(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!("Deleted document {}", id);
        Ok(())
    }

    pub async fn get_document(&self, id: i64) -> Result<Document, AppError> {
        self.repo.require_document(id).await
    }

    pub async fn find_by_slug(&self, locale: &str, slug: &str) -> Result<Document, AppError> {
        self.repo
            .get_document_by_slug(locale, slug)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No document at /{}/docs/{}", locale, slug)))
    }

    pub async fn other_translations(&self, id: i64) -> Result<Vec<Document>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let doc = db::require_document(&mut conn, id).await?;
        other_translations_in(&mut conn, &doc).await
    }

    pub async fn get_descendants(
        &self,
        id: i64,
        max_depth: Option<usize>,
    ) -> Result<Vec<Document>, AppError> {
        let mut conn = self.repo.acquire().await?;
        db::require_document(&mut conn, id).await?;
        descendants_in(&mut conn, id, max_depth).await
    }

    pub async fn is_child_of(&self, id: i64, ancestor_id: i64) -> Result<bool, AppError> {
        let mut conn = self.repo.acquire().await?;
        is_child_of(&mut conn, id, ancestor_id).await
    }

    /// Topic parent for a new `locale` translation of `source_id`, creating stub
    /// translations of missing ancestors.
    pub async fn default_topic_parent_for_translation(
        &self,
        source_id: i64,
        locale: &str,
        creator: &str,
    ) -> Result<Option<Document>, AppError> {
        let mut tx = self.repo.begin().await?;
        let source = db::require_document(&mut tx, source_id).await?;
        let parent_id =
            default_topic_parent_in(&mut tx, &source, locale, creator, &self.default_locale)
                .await?;
        let parent = match parent_id {
            Some(id) => Some(db::require_document(&mut tx, id).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(parent)
    }

    /// `id` and its topic ancestors that have content but were never rendered, nearest
    /// first. Freshly created translation stubs show up here.
    pub async fn unrendered_topic_chain(&self, id: i64) -> Result<Vec<i64>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let mut pending = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(id);
        while let Some(current) = next {
            if !visited.insert(current) {
                break;
            }
            let Some(doc) = db::fetch_document(&mut conn, current).await? else {
                break;
            };
            if doc.current_revision_id.is_some() && doc.last_rendered_at.is_none() {
                pending.push(doc.id);
            }
            next = doc.parent_topic_id;
        }
        Ok(pending)
    }

    /// Live document a redirect points at, if any.
    pub async fn redirect_target(&self, id: i64) -> Result<Option<Document>, AppError> {
        let mut conn = self.repo.acquire().await?;
        let doc = db::require_document(&mut conn, id).await?;
        if !doc.is_redirect {
            return Ok(None);
        }
        let Some((locale, slug)) = redirect_url(&doc.html).as_deref().and_then(parse_document_url)
        else {
            return Ok(None);
        };
        let target = db::fetch_document_by_slug(&mut conn, &locale, &slug).await?;
        Ok(target.filter(|t| t.id != doc.id && !t.is_redirect))
    }
}

/// Slugs are path-like: non-empty segments separated by single slashes, no whitespace.
pub fn validate_slug(slug: &str) -> Result<(), AppError> {
    if slug.is_empty() {
        return Err(AppError::Validation("Slug is required".to_string()));
    }
    if slug.starts_with('/') || slug.ends_with('/') || slug.contains("//") {
        return Err(AppError::Validation(format!(
            "Slug {:?} must not start or end with a slash or contain empty segments",
            slug
        )));
    }
    if slug.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(format!(
            "Slug {:?} must not contain whitespace",
            slug
        )));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    Ok(())
}

fn parse_category(code: i64) -> Result<Category, AppError> {
    Category::try_from(code).map_err(AppError::Validation)
}

/// Split `/{locale}/docs/{slug}` (optionally with scheme and host) into its parts.
pub fn parse_document_url(url: &str) -> Option<(String, String)> {
    let path = match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            &rest[rest.find('/')?..]
        }
        None => url,
    };
    let (locale, slug) = path.strip_prefix('/')?.split_once("/docs/")?;
    if locale.is_empty() || slug.is_empty() || locale.contains('/') {
        return None;
    }
    Some((locale.to_string(), slug.to_string()))
}

/// One translation per locale: refuse a second `locale` translation of `parent_id`.
async fn ensure_translation_free(
    conn: &mut SqliteConnection,
    parent_id: i64,
    locale: &str,
    except_id: Option<i64>,
) -> Result<(), AppError> {
    match db::find_translation(conn, parent_id, locale).await? {
        Some(existing) if Some(existing.id) != except_id => Err(AppError::AlreadyExists(format!(
            "Document {} already has a {} translation ({})",
            parent_id, locale, existing.id
        ))),
        _ => Ok(()),
    }
}

async fn ensure_slug_free(
    conn: &mut SqliteConnection,
    locale: &str,
    slug: &str,
) -> Result<(), AppError> {
    if let Some(existing) = db::fetch_document_by_slug(conn, locale, slug).await? {
        return Err(AppError::AlreadyExists(format!(
            "Document {} already exists at /{}/docs/{}",
            existing.id, locale, slug
        )));
    }
    Ok(())
}

/// Enforce tree invariants on `doc` before it is written. Fixes what can be derived
/// (localizability, inherited category) and rejects the rest.
pub async fn prepare_for_save(
    conn: &mut SqliteConnection,
    doc: &mut Document,
    default_locale: &str,
) -> Result<(), AppError> {
    if doc.locale != default_locale {
        doc.is_localizable = false;
    }

    if let Some(parent_id) = doc.parent_id {
        if parent_id == doc.id {
            return Err(AppError::Validation("A document cannot translate itself".to_string()));
        }
        let parent = db::require_document(conn, parent_id).await?;
        if !parent.is_localizable {
            return Err(AppError::Validation(format!(
                "Document {} is not localizable and cannot have translations",
                parent_id
            )));
        }
        if parent.locale == doc.locale {
            return Err(AppError::Validation(format!(
                "A translation must use a different locale than its parent ({})",
                parent.locale
            )));
        }
        let except_id = (doc.id != 0).then_some(doc.id);
        ensure_translation_free(conn, parent_id, &doc.locale, except_id).await?;
    }

    if let Some(topic_id) = doc.parent_topic_id {
        if doc.id != 0 {
            if topic_id == doc.id {
                return Err(AppError::Validation(
                    "A document cannot be its own topic parent".to_string(),
                ));
            }
            if is_child_of(conn, topic_id, doc.id).await? {
                return Err(AppError::Validation(format!(
                    "Document {} is a descendant of document {}",
                    topic_id, doc.id
                )));
            }
        }
        let topic = db::require_document(conn, topic_id).await?;
        doc.category = topic.category;
    }

    if doc.id != 0 && !doc.is_localizable {
        let (translations, _) = db::count_dependents(conn, doc.id).await?;
        if translations > 0 {
            return Err(AppError::Validation(format!(
                "Document {} has translations and must stay localizable",
                doc.id
            )));
        }
    }

    Ok(())
}

/// Whether `ancestor_id` appears on the topic-parent chain above `id`.
pub async fn is_child_of(
    conn: &mut SqliteConnection,
    id: i64,
    ancestor_id: i64,
) -> Result<bool, AppError> {
    let mut visited = HashSet::new();
    let mut next = db::require_document(conn, id).await?.parent_topic_id;
    while let Some(current) = next {
        if current == ancestor_id {
            return Ok(true);
        }
        if !visited.insert(current) {
            break;
        }
        next = match db::fetch_document(conn, current).await? {
            Some(doc) => doc.parent_topic_id,
            None => None,
        };
    }
    Ok(false)
}

/// Topic descendants in depth-first pre-order, children ordered by id.
pub async fn descendants_in(
    conn: &mut SqliteConnection,
    id: i64,
    max_depth: Option<usize>,
) -> Result<Vec<Document>, AppError> {
    let mut result = Vec::new();
    if max_depth == Some(0) {
        return Ok(result);
    }

    let mut visited = HashSet::from([id]);
    let mut stack: Vec<(Document, usize)> = db::list_topic_children(conn, id)
        .await?
        .into_iter()
        .rev()
        .map(|child| (child, 1))
        .collect();

    while let Some((doc, depth)) = stack.pop() {
        if !visited.insert(doc.id) {
            continue;
        }
        let doc_id = doc.id;
        result.push(doc);
        if max_depth.map_or(true, |max| depth < max) {
            let children = db::list_topic_children(conn, doc_id).await?;
            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
    }
    Ok(result)
}

/// Set `category` on every topic descendant of `id`.
pub async fn cascade_category(
    conn: &mut SqliteConnection,
    id: i64,
    category: Category,
) -> Result<(), AppError> {
    for doc in descendants_in(conn, id, None).await? {
        if doc.category != category {
            db::set_document_category(conn, doc.id, category).await?;
        }
    }
    Ok(())
}

/// The translation parent plus its other translations, or a source's own translations.
pub async fn other_translations_in(
    conn: &mut SqliteConnection,
    doc: &Document,
) -> Result<Vec<Document>, AppError> {
    match doc.parent_id {
        Some(parent_id) => {
            let mut result = Vec::new();
            if let Some(parent) = db::fetch_document(conn, parent_id).await? {
                result.push(parent);
            }
            let siblings = db::list_translations(conn, parent_id).await?;
            result.extend(siblings.into_iter().filter(|d| d.id != doc.id));
            Ok(result)
        }
        None => db::list_translations(conn, doc.id).await,
    }
}

/// Walk the source's topic ancestors top-down, reusing or creating their `locale`
/// translations, and return the translation of the immediate topic parent.
///
/// A non-localizable ancestor cannot be translated, so the chain restarts below it and
/// the nearest translatable ancestors become roots in `locale`.
pub async fn default_topic_parent_in(
    conn: &mut SqliteConnection,
    source: &Document,
    locale: &str,
    creator: &str,
    default_locale: &str,
) -> Result<Option<i64>, AppError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut next = source.parent_topic_id;
    while let Some(id) = next {
        if !visited.insert(id) {
            break;
        }
        let ancestor = db::require_document(conn, id).await?;
        next = ancestor.parent_topic_id;
        chain.push(ancestor);
    }

    let mut parent_translation: Option<i64> = None;
    for ancestor in chain.into_iter().rev() {
        if !ancestor.is_localizable {
            tracing::debug!(
                "Topic ancestor {} is not localizable; no {} stub created",
                ancestor.id,
                locale
            );
            parent_translation = None;
            continue;
        }
        let existing = match db::find_translation(conn, ancestor.id, locale).await? {
            Some(doc) => Some(doc),
            None => db::fetch_document_by_slug(conn, locale, &ancestor.slug).await?,
        };
        let translation = match existing {
            Some(doc) => doc,
            None => {
                create_stub_translation(
                    conn,
                    &ancestor,
                    locale,
                    parent_translation,
                    creator,
                    default_locale,
                )
                .await?
            }
        };
        parent_translation = Some(translation.id);
    }
    Ok(parent_translation)
}

async fn create_stub_translation(
    conn: &mut SqliteConnection,
    ancestor: &Document,
    locale: &str,
    parent_topic_id: Option<i64>,
    creator: &str,
    default_locale: &str,
) -> Result<Document, AppError> {
    let mut stub = Document::draft(locale, ancestor.slug.clone(), ancestor.title.clone());
    stub.parent_id = Some(ancestor.id);
    stub.parent_topic_id = parent_topic_id;
    stub.category = ancestor.category;
    stub.is_localizable = false;
    prepare_for_save(conn, &mut stub, default_locale).await?;
    let stub = db::insert_document(conn, &stub).await?;

    let current = match ancestor.current_revision_id {
        Some(id) => db::fetch_revision(conn, id).await?,
        None => None,
    };
    if let Some(current) = current {
        let revision = NewRevision {
            content: current.content,
            creator: creator.to_string(),
            title: Some(ancestor.title.clone()),
            slug: Some(ancestor.slug.clone()),
            tags: current.tags,
            review_tags: vec![TRANSLATION_REVIEW_TAG.to_string()],
            comment: String::new(),
            is_approved: true,
            based_on_id: Some(current.id),
            significance: None,
        };
        create_revision_in(conn, &stub, revision).await?;
    }

    tracing::info!(
        "Created {} stub {} for topic ancestor {}",
        locale,
        stub.id,
        ancestor.id
    );
    db::require_document(conn, stub.id).await
}

/// Tags of the document's current revision.
pub async fn current_tags(
    conn: &mut SqliteConnection,
    doc: &Document,
) -> Result<Vec<String>, AppError> {
    let Some(id) = doc.current_revision_id else {
        return Ok(Vec::new());
    };
    Ok(db::fetch_revision(conn, id)
        .await?
        .map(|rev| rev.tags)
        .unwrap_or_default())
}

/// Summary cached on the document at render time.
pub async fn build_summary_json(
    conn: &mut SqliteConnection,
    doc: &Document,
    tags: &[String],
) -> Result<serde_json::Value, AppError> {
    let translations: Vec<serde_json::Value> = other_translations_in(conn, doc)
        .await?
        .iter()
        .map(|t| {
            json!({
                "locale": t.locale,
                "slug": t.slug,
                "title": t.title,
                "url": t.url(),
            })
        })
        .collect();

    Ok(json!({
        "title": doc.title,
        "slug": doc.slug,
        "locale": doc.locale,
        "url": doc.url(),
        "tags": tags,
        "translations": translations,
    }))
}
