//! Content API client.
//!
//! The content API answers `GET /api/novels/{work_id}/chapters/{number}` with
//! an envelope `{"success": bool, "data": {"title": .., "content": .., ..}}`.

use crate::error::{AppError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Chapter text as delivered by a content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterPayload {
    /// Chapter title.
    pub title: String,
    /// Chapter text.
    pub content: String,
}

/// Anything that can deliver chapter text.
pub trait ContentSource: Send + Sync {
    /// Retrieve one chapter.
    ///
    /// Transport failures and non-success answers are [`AppError::Network`];
    /// a success answer without a title or content is [`AppError::Content`].
    fn fetch_chapter(
        &self,
        work_id: &str,
        chapter_number: i64,
    ) -> impl Future<Output = Result<ChapterPayload>> + Send;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode a content API response body.
pub fn parse_envelope(body: &str) -> Result<ChapterPayload> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| AppError::Content(format!("Invalid response body: {}", e)))?;

    if !envelope.success {
        return Err(AppError::Network(format!(
            "Content API reported failure: {}",
            envelope.message.as_deref().unwrap_or("no message")
        )));
    }

    let data = envelope
        .data
        .ok_or_else(|| AppError::Content("Response has no data".to_string()))?;

    let field = |name: &str| {
        data.get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::Content(format!("Response data has no {}", name)))
    };

    Ok(ChapterPayload {
        title: field("title")?,
        content: field("content")?,
    })
}

/// HTTP client for the content API.
#[derive(Clone, Debug)]
pub struct ContentClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ContentClient {
    /// Create a client for the given base URL (e.g. "https://novels.example.org").
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = base_url.into();
        tracing::debug!(base_url = %base_url, "Creating content client");

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        })
    }

    /// Return a client that sends the given bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// URL of one chapter.
    pub fn chapter_url(&self, work_id: &str, chapter_number: i64) -> String {
        format!(
            "{}/api/novels/{}/chapters/{}",
            self.base_url,
            urlencoding::encode(work_id),
            chapter_number
        )
    }
}

impl ContentSource for ContentClient {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch_chapter(&self, work_id: &str, chapter_number: i64) -> Result<ChapterPayload> {
        let url = self.chapter_url(work_id, chapter_number);

        let mut req = self.client.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Network(format!("GET {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Network(format!("GET {} returned {}", url, status)));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Network(format!("Failed to read {}: {}", url, e)))?;

        parse_envelope(&body)
    }
}
