//! In-process queue for deferred renders.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::RenderCoordinator;
use crate::errors::AppError;

/// Channel buffer size for render jobs.
const JOB_BUFFER_SIZE: usize = 1000;

/// One deferred render request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub job_id: Uuid,
    pub document_id: i64,
    pub cache_control: Option<String>,
    pub base_url: String,
}

impl RenderJob {
    pub fn new(document_id: i64, cache_control: Option<&str>, base_url: &str) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            document_id,
            cache_control: cache_control.map(str::to_string),
            base_url: base_url.to_string(),
        }
    }
}

/// Where deferred renders are sent. Enqueueing must not block on the render itself.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    async fn enqueue(&self, job: RenderJob) -> Result<(), AppError>;
}

/// Bounded tokio channel feeding a single render worker.
#[derive(Clone)]
pub struct ChannelRenderQueue {
    sender: mpsc::Sender<RenderJob>,
}

impl ChannelRenderQueue {
    pub fn new() -> (Self, mpsc::Receiver<RenderJob>) {
        let (sender, receiver) = mpsc::channel(JOB_BUFFER_SIZE);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl RenderQueue for ChannelRenderQueue {
    async fn enqueue(&self, job: RenderJob) -> Result<(), AppError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::Internal("Render queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Internal("Render queue is closed".to_string())
            }
        })
    }
}

/// Drain the queue, rendering each job in turn until every sender is dropped.
pub fn spawn_render_worker(
    coordinator: Arc<RenderCoordinator>,
    mut receiver: mpsc::Receiver<RenderJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Render worker started");
        while let Some(job) = receiver.recv().await {
            let result = coordinator
                .render(job.document_id, job.cache_control.as_deref(), &job.base_url)
                .await;
            match result {
                Ok(_) => tracing::debug!(
                    "Render job {} finished for document {}",
                    job.job_id,
                    job.document_id
                ),
                Err(AppError::RenderingInProgress { .. }) => tracing::debug!(
                    "Render job {} skipped; document {} is already rendering",
                    job.job_id,
                    job.document_id
                ),
                Err(e) => tracing::warn!("Render job {} failed: {}", job.job_id, e),
            }
        }
        tracing::info!("Render worker stopped");
    })
}
