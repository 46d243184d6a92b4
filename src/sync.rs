//! Reading progress reconciliation.

mod reconciler;
mod remote;

pub use reconciler::ProgressReconciler;
pub use remote::RemoteProgressClient;

use crate::db::{Database, ReadingProgress, now_millis};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One reading-position write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// User ID.
    pub user_id: String,
    /// Work ID.
    pub work_id: String,
    /// Chapter being read; added to the read set.
    pub chapter_number: i64,
    /// Scroll offset within the chapter.
    pub position: i64,
}

/// The store of record for reading progress.
///
/// Every write must be a single atomic operation on the store's side.
/// Implementations never emulate one with a read followed by a write.
pub trait ProgressRemote: Send + Sync {
    /// Create or update the record: overwrite position, insert the chapter
    /// into the read set, refresh `last_read_at`.
    fn upsert_progress(
        &self,
        update: &ProgressUpdate,
    ) -> impl Future<Output = Result<ReadingProgress>> + Send;

    /// Current record, if the user ever read the work.
    fn fetch_progress(
        &self,
        user_id: &str,
        work_id: &str,
    ) -> impl Future<Output = Result<Option<ReadingProgress>>> + Send;

    /// Set or clear the completion flag, creating the record if needed.
    fn set_completed(
        &self,
        user_id: &str,
        work_id: &str,
        completed: bool,
    ) -> impl Future<Output = Result<ReadingProgress>> + Send;

    /// Every record of a user, most recently read first.
    fn list_progress(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<ReadingProgress>>> + Send;
}

impl ProgressRemote for Database {
    async fn upsert_progress(&self, update: &ProgressUpdate) -> Result<ReadingProgress> {
        Database::upsert_progress(
            self,
            &update.user_id,
            &update.work_id,
            update.chapter_number,
            update.position,
            now_millis(),
        )
    }

    async fn fetch_progress(&self, user_id: &str, work_id: &str) -> Result<Option<ReadingProgress>> {
        self.get_progress(user_id, work_id)
    }

    async fn set_completed(
        &self,
        user_id: &str,
        work_id: &str,
        completed: bool,
    ) -> Result<ReadingProgress> {
        Database::set_completed(self, user_id, work_id, completed, now_millis())
    }

    async fn list_progress(&self, user_id: &str) -> Result<Vec<ReadingProgress>> {
        Database::list_progress(self, user_id)
    }
}
