mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication session for the sync API.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Reading progress for one work, as held by the store of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProgress {
    /// User ID.
    pub user_id: String,
    /// Work ID.
    pub work_id: String,
    /// Chapter the user last opened.
    pub current_chapter: i64,
    /// Scroll offset within the current chapter.
    pub current_position: i64,
    /// Every chapter ever opened, ascending and without duplicates.
    pub chapters_read: Vec<i64>,
    /// Set only by an explicit completion action.
    pub is_completed: bool,
    /// Last write, in milliseconds since the epoch.
    pub last_read_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Millisecond timestamp helper.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a millisecond timestamp to DateTime.
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
