//! REST API module.
//!
//! Handlers are thin: each one calls a single core operation and wraps the result.

mod documents;
mod revisions;

pub use documents::*;
pub use revisions::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Re-render documents whose current content just changed. The write has already been
/// committed, so failures here are logged rather than returned.
pub(crate) async fn rerender_after_write(state: &AppState, document_ids: &[i64]) {
    for &id in document_ids {
        let outcome = state
            .renderer
            .schedule_rendering(id, Some("no-cache"), &state.config.site_url)
            .await;
        match outcome {
            Ok(_) => tracing::debug!("Re-render scheduled for document {}", id),
            Err(AppError::RenderingInProgress { .. }) => {
                tracing::info!("Document {} is already rendering; skipping re-render", id)
            }
            Err(e) => tracing::warn!("Failed to re-render document {}: {}", id, e),
        }
    }
}
