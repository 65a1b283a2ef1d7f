//! Revision API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{rerender_after_write, success, ApiResult};
use crate::models::{NewRevision, PickedRevision, ReviewRevisionRequest, Revision, SavedRevision};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentRevisionQuery {
    pub reviewed_only: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutdatedStatus {
    pub document_id: i64,
    pub majorly_outdated: bool,
}

/// GET /api/documents/:id/revisions - Revision history, newest first.
pub async fn list_revisions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Revision>> {
    success(state.revisions.list_revisions(id).await?)
}

/// POST /api/documents/:id/revisions - Save a new revision.
pub async fn create_revision(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<NewRevision>,
) -> ApiResult<SavedRevision> {
    let saved = state.revisions.create_revision(id, request).await?;
    if saved.promoted {
        rerender_after_write(&state, &[id]).await;
    }
    success(saved)
}

/// GET /api/documents/:id/current-revision - Best available revision.
pub async fn get_current_revision(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<CurrentRevisionQuery>,
) -> ApiResult<PickedRevision> {
    let pick = state
        .revisions
        .get_current_or_latest(id, query.reviewed_only.unwrap_or(true))
        .await?;
    success(pick.into())
}

/// GET /api/documents/:id/outdated - Whether a translation lags a major source change.
pub async fn get_outdated(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<OutdatedStatus> {
    let majorly_outdated = state.revisions.is_majorly_outdated(id).await?;
    success(OutdatedStatus {
        document_id: id,
        majorly_outdated,
    })
}

/// GET /api/revisions/:id - Get a single revision.
pub async fn get_revision(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Revision> {
    success(state.revisions.get_revision(id).await?)
}

/// POST /api/revisions/:id/review - Approve or reject a revision.
pub async fn review_revision(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ReviewRevisionRequest>,
) -> ApiResult<SavedRevision> {
    let saved = state
        .revisions
        .review_revision(id, request.approve, &request.reviewer)
        .await?;
    if saved.promoted {
        rerender_after_write(&state, &[saved.revision.document_id]).await;
    }
    success(saved)
}
