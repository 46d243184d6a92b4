use crate::cache::{
    CacheInfo, CachedChapter, TrimReport, WorkCacheSummary, chapter_key, validate_chapter,
    validate_work_id,
};
use crate::db::now_millis;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Current layout of the cache database.
const SCHEMA_VERSION: i64 = 1;

static GLOBAL: OnceCell<ChapterStore> = OnceCell::const_new();

/// Local chapter store.
///
/// A handle may be detached from any database (never opened, or closed).
/// Reads through a detached handle see an empty cache; writes fail with
/// [`AppError::StorageUnavailable`].
#[derive(Clone)]
pub struct ChapterStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl ChapterStore {
    /// Open or create the cache at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::StorageUnavailable(format!("Failed to create cache directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to open cache: {}", e)))?;
        Self::from_connection(conn)
    }

    /// Open in-memory cache (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to open cache: {}", e)))?;
        Self::from_connection(conn)
    }

    /// A handle with no backing database.
    pub fn detached() -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Process-wide store, opened on first use.
    ///
    /// Concurrent first callers wait on the same initialization; later
    /// calls return the existing handle whatever path they pass.
    pub async fn global(path: &Path) -> Result<&'static ChapterStore> {
        GLOBAL
            .get_or_try_init(|| async move {
                tracing::info!(path = %path.display(), "Opening chapter cache");
                Self::open(path)
            })
            .await
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to configure cache: {}", e)))?;
        initialize_schema(&mut conn).map_err(|e| {
            AppError::StorageUnavailable(format!("Failed to initialize cache schema: {}", e))
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Whether a database is attached.
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Detach the database. Every clone of this handle is affected.
    pub fn close(&self) {
        if self.conn.lock().take().is_some() {
            tracing::debug!("Chapter cache closed");
        }
    }

    /// Store a chapter, replacing any previous entry for the same key.
    pub fn put(
        &self,
        work_id: &str,
        chapter_number: i64,
        title: &str,
        content: &str,
    ) -> Result<CachedChapter> {
        let work_id = validate_work_id(work_id)?;
        let chapter_number = validate_chapter(chapter_number)?;

        let chapter = CachedChapter {
            key: chapter_key(work_id, chapter_number),
            work_id: work_id.to_string(),
            chapter_number,
            title: title.to_string(),
            content: content.to_string(),
            size_bytes: content.len() as i64,
            saved_at: now_millis(),
        };

        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(not_open)?;

        // One statement, so content and size_bytes are replaced together.
        conn.execute(
            "INSERT INTO cached_chapters
             (key, work_id, chapter_number, title, content, size_bytes, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (key) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                size_bytes = excluded.size_bytes,
                saved_at = excluded.saved_at",
            params![
                chapter.key,
                chapter.work_id,
                chapter.chapter_number,
                chapter.title,
                chapter.content,
                chapter.size_bytes,
                chapter.saved_at,
            ],
        )
        .map_err(|e| AppError::StorageUnavailable(format!("Failed to cache chapter: {}", e)))?;

        tracing::debug!(
            work_id = %chapter.work_id,
            chapter = chapter.chapter_number,
            bytes = chapter.size_bytes,
            "Cached chapter"
        );
        Ok(chapter)
    }

    /// Look up a cached chapter.
    pub fn get(&self, work_id: &str, chapter_number: i64) -> Result<Option<CachedChapter>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(None);
        };

        conn.query_row(
            "SELECT key, work_id, chapter_number, title, content, size_bytes, saved_at
             FROM cached_chapters WHERE key = ?1",
            params![chapter_key(work_id.trim(), chapter_number)],
            |row| {
                Ok(CachedChapter {
                    key: row.get(0)?,
                    work_id: row.get(1)?,
                    chapter_number: row.get(2)?,
                    title: row.get(3)?,
                    content: row.get(4)?,
                    size_bytes: row.get(5)?,
                    saved_at: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::StorageUnavailable(format!("Failed to read chapter: {}", e)))
    }

    /// Cached chapter numbers of a work, ascending.
    pub fn list_chapter_numbers(&self, work_id: &str) -> Result<Vec<i64>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT chapter_number FROM cached_chapters
                 WHERE work_id = ?1 ORDER BY chapter_number",
            )
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to prepare query: {}", e)))?;

        let numbers = stmt
            .query_map(params![work_id.trim()], |row| row.get::<_, i64>(0))
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to list chapters: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                AppError::StorageUnavailable(format!("Failed to collect chapters: {}", e))
            })?;

        Ok(numbers)
    }

    /// Count and stored byte total for a work.
    pub fn cache_info(&self, work_id: &str) -> Result<CacheInfo> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(CacheInfo::default());
        };

        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)
             FROM cached_chapters WHERE work_id = ?1",
            params![work_id.trim()],
            |row| {
                Ok(CacheInfo {
                    count: row.get(0)?,
                    total_bytes: row.get(1)?,
                })
            },
        )
        .map_err(|e| AppError::StorageUnavailable(format!("Failed to read cache info: {}", e)))
    }

    /// Remove every cached chapter of a work in one statement.
    pub fn clear(&self, work_id: &str) -> Result<usize> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(not_open)?;

        let removed = conn
            .execute(
                "DELETE FROM cached_chapters WHERE work_id = ?1",
                params![work_id.trim()],
            )
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to clear cache: {}", e)))?;

        tracing::info!(work_id = %work_id.trim(), removed, "Cleared cached chapters");
        Ok(removed)
    }

    /// Remove a single cached chapter.
    pub fn remove(&self, work_id: &str, chapter_number: i64) -> Result<bool> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(not_open)?;

        let rows = conn
            .execute(
                "DELETE FROM cached_chapters WHERE key = ?1",
                params![chapter_key(work_id.trim(), chapter_number)],
            )
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to remove chapter: {}", e)))?;
        Ok(rows > 0)
    }

    /// Usage summary for every cached work, ordered by work ID.
    pub fn list_works(&self) -> Result<Vec<WorkCacheSummary>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let mut stmt = conn
            .prepare(
                "SELECT work_id, COUNT(*), SUM(size_bytes), MAX(saved_at)
                 FROM cached_chapters GROUP BY work_id ORDER BY work_id",
            )
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to prepare query: {}", e)))?;

        let works = stmt
            .query_map([], |row| {
                Ok(WorkCacheSummary {
                    work_id: row.get(0)?,
                    count: row.get(1)?,
                    total_bytes: row.get(2)?,
                    last_saved_at: row.get(3)?,
                })
            })
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to list works: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to collect works: {}", e)))?;

        Ok(works)
    }

    /// Stored byte total across all works.
    pub fn total_bytes(&self) -> Result<i64> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(0);
        };

        conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM cached_chapters",
            [],
            |row| row.get(0),
        )
        .map_err(|e| AppError::StorageUnavailable(format!("Failed to read cache size: {}", e)))
    }

    /// Delete oldest entries until at most `max_bytes` remain.
    ///
    /// Entries go in ascending `saved_at` order, ties broken by key. The
    /// entry named by `keep` is skipped. Runs as one transaction: either
    /// the whole trim lands or nothing does.
    pub fn trim_to(&self, max_bytes: i64, keep: Option<&str>) -> Result<TrimReport> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or_else(not_open)?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to begin trim: {}", e)))?;

        let mut total: i64 = tx
            .query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM cached_chapters",
                [],
                |row| row.get(0),
            )
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to read cache size: {}", e)))?;

        let mut report = TrimReport::default();

        if total > max_bytes {
            let candidates: Vec<(String, i64)> = {
                let mut stmt = tx
                    .prepare("SELECT key, size_bytes FROM cached_chapters ORDER BY saved_at, key")
                    .map_err(|e| {
                        AppError::StorageUnavailable(format!("Failed to prepare query: {}", e))
                    })?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                    .map_err(|e| {
                        AppError::StorageUnavailable(format!("Failed to list entries: {}", e))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| {
                        AppError::StorageUnavailable(format!("Failed to collect entries: {}", e))
                    })?;
                rows
            };

            for (key, size) in candidates {
                if total <= max_bytes {
                    break;
                }
                if keep == Some(key.as_str()) {
                    continue;
                }
                tx.execute("DELETE FROM cached_chapters WHERE key = ?1", params![key])
                    .map_err(|e| {
                        AppError::StorageUnavailable(format!("Failed to evict chapter: {}", e))
                    })?;
                total -= size;
                report.removed += 1;
                report.freed_bytes += size;
            }
        }

        tx.commit()
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to commit trim: {}", e)))?;

        report.remaining_bytes = total;
        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                freed = report.freed_bytes,
                remaining = report.remaining_bytes,
                "Trimmed chapter cache"
            );
        }
        Ok(report)
    }
}

fn not_open() -> AppError {
    AppError::StorageUnavailable("Chapter cache is not open".to_string())
}

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// The version check and the upgrade share one immediate transaction, so
/// two processes opening a fresh file cannot both run the upgrade.
fn initialize_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let version: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cached_chapters (
                key TEXT PRIMARY KEY,
                work_id TEXT NOT NULL,
                chapter_number INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                saved_at INTEGER NOT NULL,
                UNIQUE (work_id, chapter_number)
            );

            CREATE INDEX IF NOT EXISTS idx_cached_chapters_work ON cached_chapters(work_id);
            CREATE INDEX IF NOT EXISTS idx_cached_chapters_saved ON cached_chapters(saved_at);
            "#,
        )?;
    }

    if version < SCHEMA_VERSION {
        tx.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    }

    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> ChapterStore {
        ChapterStore::open_memory().unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let store = test_store();
        let written = store.put("novel-x", 1, "Prologue", "It begins.").unwrap();

        let found = store.get("novel-x", 1).unwrap().unwrap();
        assert_eq!(found, written);
        assert_eq!(found.key, "novel-x:1");
        assert_eq!(found.size_bytes, 10);
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = test_store();
        assert!(store.get("novel-x", 7).unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_whole_entry() {
        let store = test_store();
        store.put("novel-x", 2, "Old title", "short").unwrap();
        store.put("novel-x", 2, "New title", "a longer body").unwrap();

        let found = store.get("novel-x", 2).unwrap().unwrap();
        assert_eq!(found.title, "New title");
        assert_eq!(found.content, "a longer body");
        assert_eq!(found.size_bytes, 13);
        assert_eq!(store.cache_info("novel-x").unwrap().count, 1);
    }

    #[test]
    fn test_put_rejects_missing_ids() {
        let store = test_store();
        assert!(matches!(
            store.put("", 1, "t", "c"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store.put("novel-x", 0, "t", "c"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_list_is_sorted_and_sparse() {
        let store = test_store();
        for n in [10, 2, 7] {
            store.put("novel-x", n, "t", "c").unwrap();
        }
        store.put("other", 1, "t", "c").unwrap();

        assert_eq!(store.list_chapter_numbers("novel-x").unwrap(), vec![2, 7, 10]);
        assert_eq!(store.list_chapter_numbers("other").unwrap(), vec![1]);
        assert!(store.list_chapter_numbers("none").unwrap().is_empty());
    }

    #[test]
    fn test_remove_single_chapter() {
        let store = test_store();
        store.put("novel-x", 1, "t", "one").unwrap();
        store.put("novel-x", 2, "t", "two").unwrap();

        assert!(store.remove("novel-x", 1).unwrap());
        assert!(!store.remove("novel-x", 1).unwrap());
        assert_eq!(store.list_chapter_numbers("novel-x").unwrap(), vec![2]);
    }

    #[test]
    fn test_detached_reads_are_empty() {
        let store = ChapterStore::detached();
        assert!(!store.is_open());
        assert!(store.get("novel-x", 1).unwrap().is_none());
        assert!(store.list_chapter_numbers("novel-x").unwrap().is_empty());
        assert_eq!(store.cache_info("novel-x").unwrap(), CacheInfo::default());
        assert!(store.list_works().unwrap().is_empty());
        assert_eq!(store.total_bytes().unwrap(), 0);
    }

    #[test]
    fn test_detached_writes_fail() {
        let store = ChapterStore::detached();
        assert!(matches!(
            store.put("novel-x", 1, "t", "c"),
            Err(AppError::StorageUnavailable(_))
        ));
        assert!(matches!(
            store.clear("novel-x"),
            Err(AppError::StorageUnavailable(_))
        ));
        assert!(matches!(
            store.trim_to(0, None),
            Err(AppError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_close_detaches_all_clones() {
        let store = test_store();
        let other = store.clone();
        store.put("novel-x", 1, "t", "c").unwrap();

        other.close();
        assert!(!store.is_open());
        assert!(store.get("novel-x", 1).unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_schema_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("chapters.db");

        {
            let store = ChapterStore::open(&path).unwrap();
            store.put("novel-x", 3, "Three", "content").unwrap();
        }

        let store = ChapterStore::open(&path).unwrap();
        assert_eq!(store.list_chapter_numbers("novel-x").unwrap(), vec![3]);
    }

    #[test]
    fn test_trim_removes_oldest_first() {
        let store = test_store();
        store.put("a", 1, "t", "aaaa").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.put("b", 1, "t", "bbbb").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.put("c", 1, "t", "cccc").unwrap();

        let report = store.trim_to(8, None).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.freed_bytes, 4);
        assert_eq!(report.remaining_bytes, 8);
        assert!(store.get("a", 1).unwrap().is_none());
        assert!(store.get("b", 1).unwrap().is_some());
    }

    #[test]
    fn test_trim_skips_kept_entry() {
        let store = test_store();
        store.put("a", 1, "t", "aaaa").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.put("b", 1, "t", "bbbb").unwrap();

        let report = store.trim_to(4, Some("a:1")).unwrap();
        assert_eq!(report.removed, 1);
        assert!(store.get("a", 1).unwrap().is_some());
        assert!(store.get("b", 1).unwrap().is_none());
    }

    #[test]
    fn test_trim_under_limit_is_noop() {
        let store = test_store();
        store.put("a", 1, "t", "aaaa").unwrap();

        let report = store.trim_to(100, None).unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.remaining_bytes, 4);
    }

    #[test]
    fn test_list_works() {
        let store = test_store();
        store.put("b", 1, "t", "xx").unwrap();
        store.put("a", 1, "t", "x").unwrap();
        store.put("a", 2, "t", "xyz").unwrap();

        let works = store.list_works().unwrap();
        assert_eq!(works.len(), 2);
        assert_eq!(works[0].work_id, "a");
        assert_eq!(works[0].count, 2);
        assert_eq!(works[0].total_bytes, 4);
        assert_eq!(works[1].work_id, "b");
        assert_eq!(store.total_bytes().unwrap(), 6);
    }
}
