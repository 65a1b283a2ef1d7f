//! Document API endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    Json,
};
use serde::Deserialize;

use super::{rerender_after_write, success, ApiResult};
use crate::models::{
    CreateDocumentRequest, CreateTranslationRequest, Document, DocumentSummary,
    MoveDocumentRequest, RenderedContent, ScheduleOutcome, SetParentTopicRequest,
    UpdateDocumentRequest,
};
use crate::mover::MoveReport;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DescendantsQuery {
    pub depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MoveConflictsQuery {
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct TranslationParentRequest {
    pub locale: String,
    pub creator: String,
}

fn cache_control(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
}

/// POST /api/documents - Create a document with its first revision.
pub async fn create_document(
    State(state): State<AppState>,
    Json(request): Json<CreateDocumentRequest>,
) -> ApiResult<Document> {
    let doc = state.tree.create_document(request).await?;
    if doc.current_revision_id.is_some() {
        rerender_after_write(&state, &[doc.id]).await;
    }
    success(state.repo.require_document(doc.id).await?)
}

/// GET /api/docs/:locale/*slug - Look a document up by its URL.
pub async fn find_document(
    State(state): State<AppState>,
    Path((locale, slug)): Path<(String, String)>,
) -> ApiResult<Document> {
    success(state.tree.find_by_slug(&locale, &slug).await?)
}

/// GET /api/documents/:id - Get a single document.
pub async fn get_document(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Document> {
    success(state.tree.get_document(id).await?)
}

/// PUT /api/documents/:id - Update document metadata.
pub async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateDocumentRequest>,
) -> ApiResult<Document> {
    success(state.tree.update_document(id, request).await?)
}

/// DELETE /api/documents/:id - Delete a document without dependents.
pub async fn delete_document(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.tree.delete_document(id).await?;
    success(())
}

/// GET /api/documents/:id/rendered - Rendered output, rendering or deferring as needed.
pub async fn get_rendered(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<RenderedContent> {
    let content = state
        .renderer
        .get_rendered(id, cache_control(&headers), &state.config.site_url)
        .await?;
    success(content)
}

/// POST /api/documents/:id/render - Render now.
pub async fn render_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<RenderedContent> {
    let content = state
        .renderer
        .render(id, cache_control(&headers), &state.config.site_url)
        .await?;
    success(content)
}

/// POST /api/documents/:id/schedule-render - Render now or queue a deferred render.
pub async fn schedule_render(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<ScheduleOutcome> {
    let outcome = state
        .renderer
        .schedule_rendering(id, cache_control(&headers), &state.config.site_url)
        .await?;
    success(outcome)
}

/// GET /api/documents/:id/translations - Other translations of a document.
pub async fn list_translations(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Document>> {
    success(state.tree.other_translations(id).await?)
}

/// POST /api/documents/:id/translations - Translate a document into another locale.
pub async fn create_translation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CreateTranslationRequest>,
) -> ApiResult<Document> {
    let doc = state.tree.create_translation(id, request).await?;
    // Covers the translation and any topic stubs created above it.
    let pending = state.tree.unrendered_topic_chain(doc.id).await?;
    rerender_after_write(&state, &pending).await;
    success(state.repo.require_document(doc.id).await?)
}

/// GET /api/documents/:id/descendants - Topic subtree in pre-order.
pub async fn get_descendants(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DescendantsQuery>,
) -> ApiResult<Vec<Document>> {
    success(state.tree.get_descendants(id, query.depth).await?)
}

/// PUT /api/documents/:id/parent-topic - Re-parent a document in the topic tree.
pub async fn set_parent_topic(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SetParentTopicRequest>,
) -> ApiResult<Document> {
    success(state.tree.set_parent_topic(id, request.parent_topic_id).await?)
}

/// GET /api/documents/:id/is-child-of/:ancestor_id - Ancestor check over topic parents.
pub async fn get_is_child_of(
    State(state): State<AppState>,
    Path((id, ancestor_id)): Path<(i64, i64)>,
) -> ApiResult<bool> {
    success(state.tree.is_child_of(id, ancestor_id).await?)
}

/// POST /api/documents/:id/translation-parent - Topic parent for a new translation,
/// creating stub translations of missing ancestors.
pub async fn ensure_translation_parent(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<TranslationParentRequest>,
) -> ApiResult<Option<Document>> {
    let parent = state
        .tree
        .default_topic_parent_for_translation(id, &request.locale, &request.creator)
        .await?;
    let Some(parent) = parent else {
        return success(None);
    };
    let pending = state.tree.unrendered_topic_chain(parent.id).await?;
    rerender_after_write(&state, &pending).await;
    success(Some(state.repo.require_document(parent.id).await?))
}

/// GET /api/documents/:id/redirect-target - Where a redirect points.
pub async fn get_redirect_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Option<Document>> {
    success(state.tree.redirect_target(id).await?)
}

/// GET /api/documents/:id/move-conflicts?slug= - Documents a move would overwrite.
pub async fn get_move_conflicts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<MoveConflictsQuery>,
) -> ApiResult<Vec<DocumentSummary>> {
    success(state.mover.tree_conflicts(id, &query.slug).await?)
}

/// POST /api/documents/:id/move - Move a document subtree to a new slug.
pub async fn move_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<MoveDocumentRequest>,
) -> ApiResult<MoveReport> {
    let report = state.mover.move_tree(id, &request.slug, &request.user).await?;

    let touched: Vec<i64> = report
        .moved
        .iter()
        .map(|change| change.document_id)
        .chain(report.redirects.iter().map(|redirect| redirect.id))
        .collect();
    rerender_after_write(&state, &touched).await;

    success(report)
}
