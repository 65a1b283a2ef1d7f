//! Client for the external macro-render service.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::errors::AppError;
use crate::models::RenderedContent;

/// Everything the macro service needs to expand one document.
#[derive(Debug, Clone)]
pub struct MacroRenderRequest {
    pub document_id: i64,
    pub locale: String,
    pub slug: String,
    pub title: String,
    pub url: String,
    pub tags: Vec<String>,
    pub source: String,
    pub cache_control: Option<String>,
    pub base_url: String,
}

/// Failures talking to the macro service. These never reach API callers; the coordinator
/// turns them into a rendered error entry.
#[derive(Debug, Error)]
pub enum RenderServiceError {
    #[error("macro service request failed: {0}")]
    Transport(String),
    #[error("macro service responded with status {0}")]
    Status(u16),
    #[error("macro service did not respond within {0:?}")]
    Timeout(Duration),
    #[error("macro service response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MacroRenderer: Send + Sync {
    async fn render(
        &self,
        request: &MacroRenderRequest,
    ) -> Result<RenderedContent, RenderServiceError>;
}

#[derive(Serialize)]
struct RenderEnv<'a> {
    locale: &'a str,
    slug: &'a str,
    title: &'a str,
    url: &'a str,
    tags: &'a [String],
}

#[derive(Serialize)]
struct RenderBody<'a> {
    source: &'a str,
    env: RenderEnv<'a>,
}

/// HTTP implementation posting document source to the macro service.
pub struct KumascriptClient {
    service_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl KumascriptClient {
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            service_url: service_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    fn endpoint(&self, request: &MacroRenderRequest) -> String {
        format!(
            "{}/docs/{}/{}",
            self.service_url, request.locale, request.slug
        )
    }
}

#[async_trait]
impl MacroRenderer for KumascriptClient {
    async fn render(
        &self,
        request: &MacroRenderRequest,
    ) -> Result<RenderedContent, RenderServiceError> {
        let body = RenderBody {
            source: &request.source,
            env: RenderEnv {
                locale: &request.locale,
                slug: &request.slug,
                title: &request.title,
                url: &request.url,
                tags: &request.tags,
            },
        };

        let endpoint = self.endpoint(request);
        tracing::debug!("Rendering document {} via {}", request.document_id, endpoint);

        let mut call = self
            .client
            .post(endpoint)
            .header("X-Kumascript-Base-Url", &request.base_url)
            .json(&body);
        if let Some(cache_control) = &request.cache_control {
            call = call.header(reqwest::header::CACHE_CONTROL, cache_control);
        }

        let response = call.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RenderServiceError::Status(status.as_u16()));
        }

        response
            .json::<RenderedContent>()
            .await
            .map_err(|e| self.classify(e))
    }
}

impl KumascriptClient {
    fn classify(&self, err: reqwest::Error) -> RenderServiceError {
        if err.is_timeout() {
            RenderServiceError::Timeout(self.timeout)
        } else if err.is_decode() {
            RenderServiceError::Decode(err.to_string())
        } else {
            RenderServiceError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_locale_and_slug() {
        let client = KumascriptClient::new("http://macros:9080/", Duration::from_secs(1)).unwrap();
        let request = MacroRenderRequest {
            document_id: 1,
            locale: "fr".to_string(),
            slug: "Web/CSS".to_string(),
            title: "CSS".to_string(),
            url: "/fr/docs/Web/CSS".to_string(),
            tags: vec![],
            source: String::new(),
            cache_control: None,
            base_url: "http://localhost".to_string(),
        };
        assert_eq!(client.endpoint(&request), "http://macros:9080/docs/fr/Web/CSS");
    }
}
