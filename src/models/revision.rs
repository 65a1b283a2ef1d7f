//! Revision model: one immutable authored version of a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How substantial a change is; drives translation staleness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "i64", into = "i64")]
pub enum Significance {
    Typo,
    Medium,
    Major,
}

impl Significance {
    pub fn code(&self) -> i64 {
        match self {
            Significance::Typo => 10,
            Significance::Medium => 20,
            Significance::Major => 30,
        }
    }
}

impl TryFrom<i64> for Significance {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            10 => Ok(Significance::Typo),
            20 => Ok(Significance::Medium),
            30 => Ok(Significance::Major),
            other => Err(format!("Unknown significance {}", other)),
        }
    }
}

impl From<Significance> for i64 {
    fn from(significance: Significance) -> Self {
        significance.code()
    }
}

/// One authored version of a document's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: i64,
    pub document_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub tags: Vec<String>,
    pub review_tags: Vec<String>,
    pub is_approved: bool,
    pub creator: String,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    pub comment: String,
    /// Revision of the translation parent this one was translated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub based_on_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significance: Option<Significance>,
}

/// Fields supplied by an author for a new revision.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRevision {
    pub content: String,
    pub creator: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub review_tags: Vec<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub based_on_id: Option<i64>,
    #[serde(default)]
    pub significance: Option<Significance>,
}

/// A stored revision and whether it became the document's current one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRevision {
    pub revision: Revision,
    pub promoted: bool,
}

/// Request body for reviewing a revision.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRevisionRequest {
    pub approve: bool,
    pub reviewer: String,
}

/// Which tier of the fallback chain produced a revision.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RevisionSource {
    Current,
    LatestApproved,
    LatestReviewed,
    LatestAny,
}

/// Result of the "best revision" lookup, tagged by the tier that matched.
#[derive(Debug, Clone)]
pub enum RevisionPick {
    Current(Revision),
    LatestApproved(Revision),
    LatestReviewed(Revision),
    LatestAny(Revision),
    None,
}

impl RevisionPick {
    pub fn source(&self) -> Option<RevisionSource> {
        match self {
            RevisionPick::Current(_) => Some(RevisionSource::Current),
            RevisionPick::LatestApproved(_) => Some(RevisionSource::LatestApproved),
            RevisionPick::LatestReviewed(_) => Some(RevisionSource::LatestReviewed),
            RevisionPick::LatestAny(_) => Some(RevisionSource::LatestAny),
            RevisionPick::None => None,
        }
    }

    pub fn into_revision(self) -> Option<Revision> {
        match self {
            RevisionPick::Current(rev)
            | RevisionPick::LatestApproved(rev)
            | RevisionPick::LatestReviewed(rev)
            | RevisionPick::LatestAny(rev) => Some(rev),
            RevisionPick::None => None,
        }
    }
}

/// Response body for the fallback lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickedRevision {
    pub source: Option<RevisionSource>,
    pub revision: Option<Revision>,
}

impl From<RevisionPick> for PickedRevision {
    fn from(pick: RevisionPick) -> Self {
        Self {
            source: pick.source(),
            revision: pick.into_revision(),
        }
    }
}
