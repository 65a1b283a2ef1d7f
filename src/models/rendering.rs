//! Rendered output and the structured errors a render may produce.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Error,
    Warning,
    Info,
}

/// One entry of a document's `rendered_errors` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderError {
    pub level: ErrorLevel,
    pub message: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl RenderError {
    pub fn error(message: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            level: ErrorLevel::Error,
            message: message.into(),
            args,
        }
    }
}

/// Rendered HTML together with whatever errors the render reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderedContent {
    pub html: String,
    #[serde(default)]
    pub errors: Vec<RenderError>,
}

/// Outcome of asking for a (re-)render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "outcome")]
pub enum ScheduleOutcome {
    /// Rendered inline
    Rendered { content: RenderedContent },
    /// Handed to the background queue
    Deferred { job_id: uuid::Uuid },
}
