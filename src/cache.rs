//! Offline chapter cache.

mod fetch;
mod store;

pub use fetch::ChapterFetcher;
pub use store::ChapterStore;

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Longest accepted work ID, in bytes.
pub const MAX_WORK_ID_LEN: usize = 256;

/// A chapter held in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedChapter {
    /// Composite key derived from work ID and chapter number.
    pub key: String,
    /// Work ID.
    pub work_id: String,
    /// Chapter number.
    pub chapter_number: i64,
    /// Chapter title.
    pub title: String,
    /// Chapter text.
    pub content: String,
    /// UTF-8 length of `content`, fixed at write time.
    pub size_bytes: i64,
    /// Last write, in milliseconds since the epoch.
    pub saved_at: i64,
}

/// Aggregate cache usage for one work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Number of cached chapters.
    pub count: i64,
    /// Sum of stored `size_bytes`.
    pub total_bytes: i64,
}

/// Per-work row of the downloads overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkCacheSummary {
    /// Work ID.
    pub work_id: String,
    /// Number of cached chapters.
    pub count: i64,
    /// Sum of stored `size_bytes`.
    pub total_bytes: i64,
    /// Most recent write among the work's chapters.
    pub last_saved_at: i64,
}

/// Outcome of an oldest-first trim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    /// Entries deleted.
    pub removed: usize,
    /// Bytes released.
    pub freed_bytes: i64,
    /// Bytes still cached afterwards.
    pub remaining_bytes: i64,
}

/// Composite cache key for a chapter.
///
/// The chapter number never contains `:`, so splitting on the last colon
/// recovers the pair and distinct chapters never share a key.
pub fn chapter_key(work_id: &str, chapter_number: i64) -> String {
    format!("{}:{}", work_id, chapter_number)
}

/// Check a work ID and return it trimmed.
pub fn validate_work_id(work_id: &str) -> Result<&str> {
    let work_id = work_id.trim();
    if work_id.is_empty() {
        return Err(AppError::Validation("Work ID is required".to_string()));
    }
    if work_id.len() > MAX_WORK_ID_LEN {
        return Err(AppError::Validation(format!(
            "Work ID must be at most {} bytes",
            MAX_WORK_ID_LEN
        )));
    }
    Ok(work_id)
}

/// Check that a chapter number is present (positive).
pub fn validate_chapter(chapter_number: i64) -> Result<i64> {
    if chapter_number < 1 {
        return Err(AppError::Validation(format!(
            "Chapter number must be positive, got {}",
            chapter_number
        )));
    }
    Ok(chapter_number)
}

/// Format bytes to human-readable string.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
