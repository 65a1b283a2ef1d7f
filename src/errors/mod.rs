//! Error handling module for the wiki backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::DocumentSummary;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const CONFLICT: &str = "CONFLICT";
    pub const VERSION_MISMATCH: &str = "VERSION_MISMATCH";
    pub const MOVE_CONFLICT: &str = "MOVE_CONFLICT";
    pub const RENDERING_IN_PROGRESS: &str = "RENDERING_IN_PROGRESS";
    pub const RENDERED_CONTENT_NOT_AVAILABLE: &str = "RENDERED_CONTENT_NOT_AVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
}

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found
    #[error("{0}")]
    NotFound(String),
    /// Data model invariant violation; the write was rejected
    #[error("{0}")]
    Validation(String),
    /// Unique slug already taken
    #[error("{0}")]
    AlreadyExists(String),
    /// Optimistic concurrency conflict
    #[error("{message}")]
    VersionMismatch {
        message: String,
        current_version: i64,
    },
    /// A move would overwrite live documents; nothing was changed
    #[error("moving would overwrite {} existing document(s)", conflicts.len())]
    MoveConflict { conflicts: Vec<DocumentSummary> },
    /// Another render of the same document holds the lock
    #[error("document {document_id} is already being rendered")]
    RenderingInProgress { document_id: i64 },
    /// Deferred document has no rendered output yet; a render has been queued
    #[error("rendered content for document {document_id} is not available yet")]
    RenderedContentNotAvailable { document_id: i64 },
    /// Database error
    #[error("{0}")]
    Database(String),
    /// Internal server error
    #[error("{0}")]
    Internal(String),
    /// Bad request
    #[error("{0}")]
    BadRequest(String),
    /// Invalid configuration value
    #[error("{0}")]
    Config(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::VersionMismatch { .. } => StatusCode::CONFLICT,
            AppError::MoveConflict { .. } => StatusCode::CONFLICT,
            AppError::RenderingInProgress { .. } => StatusCode::CONFLICT,
            AppError::RenderedContentNotAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::AlreadyExists(_) => codes::CONFLICT,
            AppError::VersionMismatch { .. } => codes::VERSION_MISMATCH,
            AppError::MoveConflict { .. } => codes::MOVE_CONFLICT,
            AppError::RenderingInProgress { .. } => codes::RENDERING_IN_PROGRESS,
            AppError::RenderedContentNotAvailable { .. } => codes::RENDERED_CONTENT_NOT_AVAILABLE,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
            AppError::Config(_) => codes::CONFIG_ERROR,
        }
    }

    /// Structured details attached to the error envelope, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::VersionMismatch {
                current_version, ..
            } => Some(serde_json::json!({ "currentVersion": current_version })),
            AppError::MoveConflict { conflicts } => {
                Some(serde_json::json!({ "conflicts": conflicts }))
            }
            AppError::RenderingInProgress { document_id }
            | AppError::RenderedContentNotAvailable { document_id } => {
                Some(serde_json::json!({ "documentId": document_id }))
            }
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.to_string(),
                details: error.details(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(&self);
        (status, Json(body)).into_response()
    }
}
