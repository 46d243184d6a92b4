use crate::db::ReadingProgress;
use crate::error::{AppError, Result};
use crate::sync::{ProgressRemote, ProgressUpdate};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for a novel-sync server's progress API.
///
/// The bearer token identifies the user on the server; requests for any
/// other user ID are refused locally.
#[derive(Clone, Debug)]
pub struct RemoteProgressClient {
    base_url: String,
    token: String,
    user_id: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ProgressBody {
    chapter_number: i64,
    position: i64,
}

#[derive(Serialize)]
struct CompletedBody {
    completed: bool,
}

impl RemoteProgressClient {
    /// Create a client for the given server, token and the token's user.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = base_url.into();
        tracing::debug!(base_url = %base_url, "Creating progress client");

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            user_id: user_id.into(),
            client,
        })
    }

    /// User the token belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn url(&self, work_id: Option<&str>, suffix: &str) -> String {
        match work_id {
            Some(work_id) => format!(
                "{}/api/sync/progress/{}{}",
                self.base_url,
                urlencoding::encode(work_id),
                suffix
            ),
            None => format!("{}/api/sync/progress", self.base_url),
        }
    }

    fn check_user(&self, user_id: &str) -> Result<()> {
        if user_id != self.user_id {
            return Err(AppError::Validation(format!(
                "Token belongs to {}, not {}",
                self.user_id, user_id
            )));
        }
        Ok(())
    }

    /// PUT a body; any failure is reported as a failed upsert.
    async fn put<B: Serialize>(&self, url: &str, body: &B) -> Result<ReadingProgress> {
        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::RemoteUpsert(format!("PUT {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::RemoteUpsert(format!(
                "PUT {} returned {}: {}",
                url, status, detail
            )));
        }

        resp.json()
            .await
            .map_err(|e| AppError::RemoteUpsert(format!("Invalid response from {}: {}", url, e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("GET {} failed: {}", url, e)))?;

        match resp.status() {
            status if status.is_success() => resp
                .json()
                .await
                .map_err(|e| AppError::Content(format!("Invalid response from {}: {}", url, e))),
            StatusCode::UNAUTHORIZED => Err(AppError::Unauthorized(format!(
                "GET {} rejected the token",
                url
            ))),
            status => Err(AppError::Network(format!("GET {} returned {}", url, status))),
        }
    }
}

impl ProgressRemote for RemoteProgressClient {
    async fn upsert_progress(&self, update: &ProgressUpdate) -> Result<ReadingProgress> {
        self.check_user(&update.user_id)?;
        let url = self.url(Some(&update.work_id), "");
        self.put(
            &url,
            &ProgressBody {
                chapter_number: update.chapter_number,
                position: update.position,
            },
        )
        .await
    }

    async fn fetch_progress(&self, user_id: &str, work_id: &str) -> Result<Option<ReadingProgress>> {
        self.check_user(user_id)?;
        self.get(&self.url(Some(work_id), "")).await
    }

    async fn set_completed(
        &self,
        user_id: &str,
        work_id: &str,
        completed: bool,
    ) -> Result<ReadingProgress> {
        self.check_user(user_id)?;
        let url = self.url(Some(work_id), "/completed");
        self.put(&url, &CompletedBody { completed }).await
    }

    async fn list_progress(&self, user_id: &str) -> Result<Vec<ReadingProgress>> {
        self.check_user(user_id)?;
        self.get(&self.url(None, "")).await
    }
}
