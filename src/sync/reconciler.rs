use crate::cache::{validate_chapter, validate_work_id};
use crate::db::ReadingProgress;
use crate::error::{AppError, Result};
use crate::sync::{ProgressRemote, ProgressUpdate};

/// Pushes reading state to the store of record and reads it back for resume.
///
/// Position is last-write-wins; the read set only grows. Each call is one
/// atomic upsert on the remote side, so retrying a failed or timed-out call
/// is always safe.
pub struct ProgressReconciler<R> {
    remote: R,
}

impl<R: ProgressRemote> ProgressReconciler<R> {
    /// Create a reconciler over the given store.
    pub fn new(remote: R) -> Self {
        Self { remote }
    }

    /// The underlying store.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Record that a user is at `position` in chapter `chapter_number`.
    pub async fn record_progress(
        &self,
        user_id: &str,
        work_id: &str,
        chapter_number: i64,
        position: i64,
    ) -> Result<ReadingProgress> {
        let update = ProgressUpdate {
            user_id: validate_user_id(user_id)?.to_string(),
            work_id: validate_work_id(work_id)?.to_string(),
            chapter_number: validate_chapter(chapter_number)?,
            position: validate_position(position)?,
        };

        let progress = self.remote.upsert_progress(&update).await?;
        tracing::debug!(
            user_id = %update.user_id,
            work_id = %update.work_id,
            chapter = update.chapter_number,
            position = update.position,
            read = progress.chapters_read.len(),
            "Recorded progress"
        );
        Ok(progress)
    }

    /// Current progress, or `None` if the user never read the work.
    pub async fn get_progress(
        &self,
        user_id: &str,
        work_id: &str,
    ) -> Result<Option<ReadingProgress>> {
        let user_id = validate_user_id(user_id)?;
        let work_id = validate_work_id(work_id)?;
        self.remote.fetch_progress(user_id, work_id).await
    }

    /// Explicitly mark a work finished (or not).
    pub async fn mark_completed(
        &self,
        user_id: &str,
        work_id: &str,
        completed: bool,
    ) -> Result<ReadingProgress> {
        let user_id = validate_user_id(user_id)?;
        let work_id = validate_work_id(work_id)?;
        let progress = self.remote.set_completed(user_id, work_id, completed).await?;
        tracing::info!(user_id = %user_id, work_id = %work_id, completed, "Updated completion");
        Ok(progress)
    }

    /// Continue-reading list for a user.
    pub async fn list_progress(&self, user_id: &str) -> Result<Vec<ReadingProgress>> {
        let user_id = validate_user_id(user_id)?;
        self.remote.list_progress(user_id).await
    }
}

fn validate_user_id(user_id: &str) -> Result<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::Validation("User ID is required".to_string()));
    }
    Ok(user_id)
}

fn validate_position(position: i64) -> Result<i64> {
    if position < 0 {
        return Err(AppError::Validation(format!(
            "Position must not be negative, got {}",
            position
        )));
    }
    Ok(position)
}
