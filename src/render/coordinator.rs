//! The render state machine: decides between cached output, an inline render and a
//! deferred one, and owns the render lock.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use super::kumascript::{MacroRenderRequest, MacroRenderer, RenderServiceError};
use super::queue::{RenderJob, RenderQueue};
use super::state::{is_rendering_in_progress, is_rendering_scheduled, is_rendering_timed_out};
use super::RenderSettings;
use crate::db::{self, Repository};
use crate::errors::AppError;
use crate::models::{Document, RenderError, RenderedContent, ScheduleOutcome};
use crate::tree;

/// Re-reads allowed when the row version moves under an unrelated update.
const CLAIM_ATTEMPTS: usize = 3;

pub struct RenderCoordinator {
    repo: Repository,
    renderer: Arc<dyn MacroRenderer>,
    queue: Arc<dyn RenderQueue>,
    settings: RenderSettings,
}

impl RenderCoordinator {
    pub fn new(
        repo: Repository,
        renderer: Arc<dyn MacroRenderer>,
        queue: Arc<dyn RenderQueue>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            repo,
            renderer,
            queue,
            settings,
        }
    }

    fn renders_inline(&self, doc: &Document) -> bool {
        !doc.defer_rendering || self.settings.force_immediate_rendering
    }

    /// Rendered output for a read request.
    pub async fn get_rendered(
        &self,
        document_id: i64,
        cache_control: Option<&str>,
        base_url: &str,
    ) -> Result<RenderedContent, AppError> {
        let doc = self.repo.require_document(document_id).await?;

        if self.renders_inline(&doc) {
            return match self.render(document_id, cache_control, base_url).await {
                Err(AppError::RenderingInProgress { .. }) => {
                    let doc = self.repo.require_document(document_id).await?;
                    cached_content(&doc)
                        .ok_or(AppError::RenderedContentNotAvailable { document_id })
                }
                other => other,
            };
        }

        if let Some(content) = cached_content(&doc) {
            return Ok(content);
        }

        let now = Utc::now();
        let timeout = self.settings.render_timeout;
        if is_rendering_scheduled(&doc, now, timeout) || is_rendering_in_progress(&doc, now, timeout)
        {
            tracing::debug!("Document {} already has a render pending", document_id);
        } else {
            self.enqueue(&doc, cache_control, base_url).await?;
        }
        Err(AppError::RenderedContentNotAvailable { document_id })
    }

    /// Render now, holding the document's render lock for the duration of the call.
    pub async fn render(
        &self,
        document_id: i64,
        cache_control: Option<&str>,
        base_url: &str,
    ) -> Result<RenderedContent, AppError> {
        let doc = self.claim(document_id).await?;

        let result = self.render_claimed(&doc, cache_control, base_url).await;
        if result.is_err() {
            let mut conn = self.repo.acquire().await?;
            db::release_render(&mut conn, document_id).await?;
        }
        result
    }

    /// Re-render now, or queue a render for deferred documents.
    pub async fn schedule_rendering(
        &self,
        document_id: i64,
        cache_control: Option<&str>,
        base_url: &str,
    ) -> Result<ScheduleOutcome, AppError> {
        let doc = self.repo.require_document(document_id).await?;

        if self.renders_inline(&doc) {
            let content = self.render(document_id, cache_control, base_url).await?;
            return Ok(ScheduleOutcome::Rendered { content });
        }

        let job_id = self.enqueue(&doc, cache_control, base_url).await?;
        Ok(ScheduleOutcome::Deferred { job_id })
    }

    /// Mark the document scheduled and hand a job to the queue. A queue failure is logged;
    /// the stale schedule expires after the render timeout and a later read retries.
    async fn enqueue(
        &self,
        doc: &Document,
        cache_control: Option<&str>,
        base_url: &str,
    ) -> Result<uuid::Uuid, AppError> {
        {
            let mut conn = self.repo.acquire().await?;
            db::mark_render_scheduled(&mut conn, doc.id, Utc::now()).await?;
        }

        let job = RenderJob::new(doc.id, cache_control, base_url);
        let job_id = job.job_id;
        match self.queue.enqueue(job).await {
            Ok(()) => tracing::info!("Queued deferred render {} for document {}", job_id, doc.id),
            Err(e) => tracing::warn!("Failed to queue render for document {}: {}", doc.id, e),
        }
        Ok(job_id)
    }

    async fn claim(&self, document_id: i64) -> Result<Document, AppError> {
        let mut conn = self.repo.acquire().await?;
        let timeout = self.settings.render_timeout;

        for _ in 0..CLAIM_ATTEMPTS {
            let doc = db::require_document(&mut conn, document_id).await?;
            let now = Utc::now();
            if is_rendering_in_progress(&doc, now, timeout) {
                return Err(AppError::RenderingInProgress { document_id });
            }
            if is_rendering_timed_out(&doc, now, timeout) {
                tracing::warn!("Taking over stale render lock on document {}", document_id);
            }
            if db::claim_render(&mut conn, document_id, doc.version, now).await? {
                return Ok(doc);
            }
        }

        tracing::debug!("Lost the render claim race for document {}", document_id);
        Err(AppError::RenderingInProgress { document_id })
    }

    async fn render_claimed(
        &self,
        doc: &Document,
        cache_control: Option<&str>,
        base_url: &str,
    ) -> Result<RenderedContent, AppError> {
        let tags = {
            let mut conn = self.repo.acquire().await?;
            tree::current_tags(&mut conn, doc).await?
        };

        let started = Instant::now();
        let content = if self.settings.kumascript_timeout.is_zero() {
            RenderedContent {
                html: doc.html.clone(),
                errors: Vec::new(),
            }
        } else {
            let request = MacroRenderRequest {
                document_id: doc.id,
                locale: doc.locale.clone(),
                slug: doc.slug.clone(),
                title: doc.title.clone(),
                url: doc.url(),
                tags: tags.clone(),
                source: doc.html.clone(),
                cache_control: cache_control.map(str::to_string),
                base_url: base_url.to_string(),
            };
            match self.call_service(&request).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Render of document {} failed: {}", doc.id, e);
                    RenderedContent {
                        html: doc.html.clone(),
                        errors: vec![RenderError::error(e.to_string(), Vec::new())],
                    }
                }
            }
        };
        let elapsed = started.elapsed();

        let threshold = self.settings.force_deferred_timeout;
        let force_defer = !threshold.is_zero() && elapsed >= threshold;
        if force_defer && !doc.defer_rendering {
            tracing::info!(
                "Document {} took {:?} to render; switching to deferred rendering",
                doc.id,
                elapsed
            );
        }

        let mut tx = self.repo.begin().await?;
        let summary = tree::build_summary_json(&mut tx, doc, &tags).await?;
        db::complete_render(&mut tx, doc.id, &content, Utc::now(), force_defer, &summary).await?;
        tx.commit().await?;

        Ok(content)
    }

    async fn call_service(
        &self,
        request: &MacroRenderRequest,
    ) -> Result<RenderedContent, RenderServiceError> {
        let timeout = self.settings.kumascript_timeout;
        tokio::time::timeout(timeout, self.renderer.render(request))
            .await
            .map_err(|_| RenderServiceError::Timeout(timeout))?
    }
}

fn cached_content(doc: &Document) -> Option<RenderedContent> {
    if doc.rendered_html.is_empty() {
        return None;
    }
    Some(RenderedContent {
        html: doc.rendered_html.clone(),
        errors: doc.rendered_errors.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorLevel;
    use crate::revisions::RevisionStore;
    use crate::test_support::{
        approved, insert_document, render_settings, set_render_started_at, test_db, EchoRenderer,
        FailingRenderer, RecordingQueue, TestDb,
    };
    use std::time::Duration;

    const BASE_URL: &str = "http://localhost:8080";

    async fn document_with_content(db: &TestDb, slug: &str, defer: bool) -> Document {
        let mut doc = Document::draft("en-US", slug, slug);
        doc.defer_rendering = defer;
        let doc = insert_document(&db.repo, doc).await;
        RevisionStore::new(db.repo.clone())
            .create_revision(doc.id, approved("<p>source</p>"))
            .await
            .unwrap();
        db.repo.require_document(doc.id).await.unwrap()
    }

    fn coordinator(
        db: &TestDb,
        renderer: Arc<dyn MacroRenderer>,
        queue: Arc<RecordingQueue>,
        settings: RenderSettings,
    ) -> RenderCoordinator {
        RenderCoordinator::new(db.repo.clone(), renderer, queue, settings)
    }

    #[tokio::test]
    async fn test_render_stores_output_and_summary() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let renderer = Arc::new(EchoRenderer::new());
        let coordinator = coordinator(
            &db,
            renderer.clone(),
            Arc::new(RecordingQueue::default()),
            render_settings(),
        );

        let content = coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(content.html, r#"<div class="rendered"><p>source</p></div>"#);

        let doc = db.repo.require_document(doc.id).await.unwrap();
        assert_eq!(doc.rendered_html, content.html);
        assert!(doc.last_rendered_at.is_some());
        assert!(doc.render_started_at.is_none());
        assert!(!doc.defer_rendering);
        let json = doc.json.unwrap();
        assert_eq!(json["slug"], "Web");
        assert_eq!(json["url"], "/en-US/docs/Web");
    }

    #[tokio::test]
    async fn test_render_is_idempotent() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let renderer = Arc::new(EchoRenderer::new());
        let coordinator = coordinator(
            &db,
            renderer.clone(),
            Arc::new(RecordingQueue::default()),
            render_settings(),
        );

        let first = coordinator.get_rendered(doc.id, None, BASE_URL).await.unwrap();
        let second = coordinator.get_rendered(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn test_render_refused_while_in_progress() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let coordinator = coordinator(
            &db,
            Arc::new(EchoRenderer::new()),
            Arc::new(RecordingQueue::default()),
            render_settings(),
        );

        set_render_started_at(&db, doc.id, Some(Utc::now())).await;
        let err = coordinator.render(doc.id, None, BASE_URL).await.unwrap_err();
        assert!(matches!(err, AppError::RenderingInProgress { .. }));

        // Nothing cached yet, so a read cannot fall back either.
        let err = coordinator.get_rendered(doc.id, None, BASE_URL).await.unwrap_err();
        assert!(matches!(err, AppError::RenderedContentNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_read_serves_cache_while_in_progress() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let coordinator = coordinator(
            &db,
            Arc::new(EchoRenderer::new()),
            Arc::new(RecordingQueue::default()),
            render_settings(),
        );

        let rendered = coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        set_render_started_at(&db, doc.id, Some(Utc::now())).await;

        let served = coordinator.get_rendered(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(served, rendered);
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let settings = render_settings();
        let coordinator = coordinator(
            &db,
            Arc::new(EchoRenderer::new()),
            Arc::new(RecordingQueue::default()),
            settings.clone(),
        );

        let stale = Utc::now()
            - chrono::Duration::from_std(settings.render_timeout).unwrap()
            - chrono::Duration::seconds(1);
        set_render_started_at(&db, doc.id, Some(stale)).await;

        coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        let doc = db.repo.require_document(doc.id).await.unwrap();
        assert!(doc.render_started_at.is_none());
        assert!(!doc.rendered_html.is_empty());
    }

    #[tokio::test]
    async fn test_deferred_without_cache_schedules_once() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Slow", true).await;
        let renderer = Arc::new(EchoRenderer::new());
        let queue = Arc::new(RecordingQueue::default());
        let settings = render_settings();
        let coordinator = coordinator(&db, renderer.clone(), queue.clone(), settings.clone());

        let err = coordinator.get_rendered(doc.id, None, BASE_URL).await.unwrap_err();
        assert!(matches!(err, AppError::RenderedContentNotAvailable { .. }));

        let doc = db.repo.require_document(doc.id).await.unwrap();
        let now = Utc::now();
        assert!(is_rendering_scheduled(&doc, now, settings.render_timeout));
        assert!(!is_rendering_in_progress(&doc, now, settings.render_timeout));
        assert_eq!(queue.jobs().len(), 1);
        assert_eq!(queue.jobs()[0].document_id, doc.id);

        // A second read does not pile up jobs.
        let _ = coordinator.get_rendered(doc.id, None, BASE_URL).await;
        assert_eq!(queue.jobs().len(), 1);
        assert_eq!(renderer.calls(), 0);
    }

    #[tokio::test]
    async fn test_deferred_with_cache_skips_render() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Slow", true).await;
        let renderer = Arc::new(EchoRenderer::new());
        let coordinator = coordinator(
            &db,
            renderer.clone(),
            Arc::new(RecordingQueue::default()),
            render_settings(),
        );

        let rendered = coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        let served = coordinator.get_rendered(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(served, rendered);
        assert_eq!(renderer.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_immediate_overrides_deferral() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Slow", true).await;
        let renderer = Arc::new(EchoRenderer::new());
        let queue = Arc::new(RecordingQueue::default());
        let mut settings = render_settings();
        settings.force_immediate_rendering = true;
        let coordinator = coordinator(&db, renderer.clone(), queue.clone(), settings);

        coordinator.get_rendered(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(renderer.calls(), 1);
        assert!(queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_slow_render_switches_to_deferred() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Slow", false).await;
        let mut settings = render_settings();
        settings.force_deferred_timeout = Duration::from_millis(500);
        let coordinator = coordinator(
            &db,
            Arc::new(EchoRenderer::with_delay(Duration::from_secs(1))),
            Arc::new(RecordingQueue::default()),
            settings,
        );

        coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        assert!(db.repo.require_document(doc.id).await.unwrap().defer_rendering);
    }

    #[tokio::test]
    async fn test_service_failure_becomes_error_entry() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let coordinator = coordinator(
            &db,
            Arc::new(FailingRenderer),
            Arc::new(RecordingQueue::default()),
            render_settings(),
        );

        let content = coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(content.html, "<p>source</p>");
        assert_eq!(content.errors.len(), 1);
        assert_eq!(content.errors[0].level, ErrorLevel::Error);

        let doc = db.repo.require_document(doc.id).await.unwrap();
        assert_eq!(doc.rendered_errors, content.errors);
        assert!(doc.render_started_at.is_none());
    }

    #[tokio::test]
    async fn test_service_timeout_becomes_error_entry() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let mut settings = render_settings();
        settings.kumascript_timeout = Duration::from_millis(100);
        let coordinator = coordinator(
            &db,
            Arc::new(EchoRenderer::with_delay(Duration::from_secs(2))),
            Arc::new(RecordingQueue::default()),
            settings,
        );

        let content = coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(content.html, "<p>source</p>");
        assert_eq!(content.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_service_timeout_serves_source() {
        let db = test_db().await;
        let doc = document_with_content(&db, "Web", false).await;
        let renderer = Arc::new(EchoRenderer::new());
        let mut settings = render_settings();
        settings.kumascript_timeout = Duration::ZERO;
        let coordinator = coordinator(
            &db,
            renderer.clone(),
            Arc::new(RecordingQueue::default()),
            settings,
        );

        let content = coordinator.render(doc.id, None, BASE_URL).await.unwrap();
        assert_eq!(content.html, "<p>source</p>");
        assert!(content.errors.is_empty());
        assert_eq!(renderer.calls(), 0);
    }

    #[tokio::test]
    async fn test_schedule_rendering_by_mode() {
        let db = test_db().await;
        let inline = document_with_content(&db, "Fast", false).await;
        let deferred = document_with_content(&db, "Slow", true).await;
        let queue = Arc::new(RecordingQueue::default());
        let coordinator = coordinator(
            &db,
            Arc::new(EchoRenderer::new()),
            queue.clone(),
            render_settings(),
        );

        let outcome = coordinator
            .schedule_rendering(inline.id, Some("no-cache"), BASE_URL)
            .await
            .unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Rendered { .. }));
        assert!(queue.jobs().is_empty());

        let outcome = coordinator
            .schedule_rendering(deferred.id, Some("no-cache"), BASE_URL)
            .await
            .unwrap();
        let ScheduleOutcome::Deferred { job_id } = outcome else {
            panic!("expected a deferred outcome");
        };
        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, job_id);
        assert_eq!(jobs[0].cache_control.as_deref(), Some("no-cache"));
        assert!(db
            .repo
            .require_document(deferred.id)
            .await
            .unwrap()
            .render_scheduled_at
            .is_some());
    }
}
