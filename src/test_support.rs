//! Fixtures shared by unit and HTTP tests: a throwaway database and fake collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use crate::db::{self, init_database, Repository};
use crate::models::{Document, NewRevision, RenderedContent};
use crate::render::{
    MacroRenderRequest, MacroRenderer, RenderJob, RenderQueue, RenderServiceError,
    RenderSettings,
};
use crate::errors::AppError;

/// A repository on a fresh SQLite file, removed when dropped.
pub struct TestDb {
    pub repo: Repository,
    _temp_dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = init_database(&temp_dir.path().join("test.sqlite"))
        .await
        .expect("Failed to init DB");
    TestDb {
        repo: Repository::new(pool),
        _temp_dir: temp_dir,
    }
}

pub async fn insert_document(repo: &Repository, doc: Document) -> Document {
    let mut conn = repo.acquire().await.unwrap();
    db::insert_document(&mut conn, &doc).await.unwrap()
}

pub async fn set_render_started_at(db: &TestDb, document_id: i64, at: Option<DateTime<Utc>>) {
    sqlx::query("UPDATE documents SET render_started_at = ?, version = version + 1 WHERE id = ?")
        .bind(at)
        .bind(document_id)
        .execute(db.repo.pool())
        .await
        .unwrap();
}

pub fn approved(content: &str) -> NewRevision {
    NewRevision {
        content: content.to_string(),
        creator: "tester".to_string(),
        is_approved: true,
        ..Default::default()
    }
}

pub fn draft(content: &str) -> NewRevision {
    NewRevision {
        is_approved: false,
        ..approved(content)
    }
}

pub fn render_settings() -> RenderSettings {
    RenderSettings {
        render_timeout: Duration::from_secs(180),
        force_deferred_timeout: Duration::from_secs(10),
        kumascript_timeout: Duration::from_secs(10),
        force_immediate_rendering: false,
    }
}

/// Wraps the source in a marker div, optionally after a delay.
pub struct EchoRenderer {
    calls: AtomicUsize,
    delay: Duration,
}

impl EchoRenderer {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MacroRenderer for EchoRenderer {
    async fn render(
        &self,
        request: &MacroRenderRequest,
    ) -> Result<RenderedContent, RenderServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(RenderedContent {
            html: format!(r#"<div class="rendered">{}</div>"#, request.source),
            errors: Vec::new(),
        })
    }
}

/// Always answers with a server error.
pub struct FailingRenderer;

#[async_trait]
impl MacroRenderer for FailingRenderer {
    async fn render(
        &self,
        _request: &MacroRenderRequest,
    ) -> Result<RenderedContent, RenderServiceError> {
        Err(RenderServiceError::Status(500))
    }
}

/// Keeps every job instead of running it.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<RenderJob>>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<RenderJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderQueue for RecordingQueue {
    async fn enqueue(&self, job: RenderJob) -> Result<(), AppError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

pub fn create_request(slug: &str, title: &str) -> crate::models::CreateDocumentRequest {
    crate::models::CreateDocumentRequest {
        locale: None,
        slug: slug.to_string(),
        title: title.to_string(),
        category: None,
        parent_id: None,
        parent_topic_id: None,
        is_localizable: None,
        defer_rendering: false,
        revision: approved(&format!("<p>{}</p>", title)),
    }
}
