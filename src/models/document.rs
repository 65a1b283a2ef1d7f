//! Document model: one wiki page at a locale and slug.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RenderError;

/// Navigation category. Topic children always mirror their parent's category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "i64", into = "i64")]
pub enum Category {
    #[default]
    Uncategorized,
    Reference,
    Guide,
    Template,
}

impl Category {
    pub fn code(&self) -> i64 {
        match self {
            Category::Uncategorized => 0,
            Category::Reference => 10,
            Category::Guide => 20,
            Category::Template => 60,
        }
    }
}

impl TryFrom<i64> for Category {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Category::Uncategorized),
            10 => Ok(Category::Reference),
            20 => Ok(Category::Guide),
            60 => Ok(Category::Template),
            other => Err(format!("Unknown category {}", other)),
        }
    }
}

impl From<Category> for i64 {
    fn from(category: Category) -> Self {
        category.code()
    }
}

/// A wiki page at a given locale and slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i64,
    pub locale: String,
    pub slug: String,
    pub title: String,
    pub category: Category,
    /// Source-locale document this one translates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    /// Navigation parent, independent of locale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_topic_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_revision_id: Option<i64>,
    pub is_localizable: bool,
    pub is_redirect: bool,
    /// Source of the current revision
    pub html: String,
    pub rendered_html: String,
    pub rendered_errors: Vec<RenderError>,
    pub render_started_at: Option<DateTime<Utc>>,
    pub render_scheduled_at: Option<DateTime<Utc>>,
    pub last_rendered_at: Option<DateTime<Utc>>,
    pub defer_rendering: bool,
    /// Summary refreshed on render, never on plain saves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    pub modified: DateTime<Utc>,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Document {
    /// An unsaved document with empty content and render state.
    pub fn draft(locale: impl Into<String>, slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            locale: locale.into(),
            slug: slug.into(),
            title: title.into(),
            category: Category::default(),
            parent_id: None,
            parent_topic_id: None,
            current_revision_id: None,
            is_localizable: true,
            is_redirect: false,
            html: String::new(),
            rendered_html: String::new(),
            rendered_errors: Vec::new(),
            render_started_at: None,
            render_scheduled_at: None,
            last_rendered_at: None,
            defer_rendering: false,
            json: None,
            modified: Utc::now(),
            version: 0,
        }
    }

    /// Site-relative URL of this document.
    pub fn url(&self) -> String {
        document_url(&self.locale, &self.slug)
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id,
            locale: self.locale.clone(),
            slug: self.slug.clone(),
            title: self.title.clone(),
        }
    }
}

pub fn document_url(locale: &str, slug: &str) -> String {
    format!("/{}/docs/{}", locale, slug)
}

/// Identifying fields of a document, used in listings and conflict reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: i64,
    pub locale: String,
    pub slug: String,
    pub title: String,
}

/// Request body for creating a new document together with its first revision.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub locale: Option<String>,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<i64>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub parent_topic_id: Option<i64>,
    #[serde(default)]
    pub is_localizable: Option<bool>,
    #[serde(default)]
    pub defer_rendering: bool,
    pub revision: super::NewRevision,
}

/// Request body for creating a translation of an existing document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTranslationRequest {
    pub locale: String,
    pub title: String,
    /// Defaults to the source document's slug
    #[serde(default)]
    pub slug: Option<String>,
    /// Derived from the source's topic parent when omitted
    #[serde(default)]
    pub parent_topic_id: Option<i64>,
    pub revision: super::NewRevision,
}

/// Request body for updating document metadata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<i64>,
    #[serde(default)]
    pub is_localizable: Option<bool>,
    #[serde(default)]
    pub defer_rendering: Option<bool>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for re-parenting a document in the topic tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParentTopicRequest {
    pub parent_topic_id: Option<i64>,
}

/// Request body for moving a document subtree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveDocumentRequest {
    pub slug: String,
    pub user: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serializes_as_code() {
        assert_eq!(serde_json::to_value(Category::Template).unwrap(), 60);
        let parsed: Category = serde_json::from_value(serde_json::json!(10)).unwrap();
        assert_eq!(parsed, Category::Reference);
        assert!(serde_json::from_value::<Category>(serde_json::json!(15)).is_err());
    }

    #[test]
    fn test_document_url() {
        assert_eq!(document_url("fr", "Web/CSS"), "/fr/docs/Web/CSS");
    }
}
