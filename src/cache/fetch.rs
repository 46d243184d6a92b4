use crate::cache::{CachedChapter, ChapterStore, validate_chapter, validate_work_id};
use crate::content::ContentSource;
use crate::error::{AppError, Result};

/// Fills a [`ChapterStore`] from a [`ContentSource`].
pub struct ChapterFetcher<S> {
    store: ChapterStore,
    source: S,
    max_bytes: i64,
}

impl<S: ContentSource> ChapterFetcher<S> {
    /// Create a fetcher with no size limit.
    pub fn new(store: ChapterStore, source: S) -> Self {
        Self {
            store,
            source,
            max_bytes: 0,
        }
    }

    /// Trim the cache to `max_bytes` after every fetch (0 disables).
    pub fn with_max_bytes(mut self, max_bytes: i64) -> Self {
        self.max_bytes = max_bytes.max(0);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &ChapterStore {
        &self.store
    }

    /// Download a chapter and cache it. Failures reach the caller.
    ///
    /// A failed download leaves any previously cached copy untouched. Once
    /// the chapter is written, a failing size trim is logged, not returned.
    pub async fn fetch_and_cache(&self, work_id: &str, chapter_number: i64) -> Result<CachedChapter> {
        let work_id = validate_work_id(work_id)?;
        let chapter_number = validate_chapter(chapter_number)?;

        let payload = self.source.fetch_chapter(work_id, chapter_number).await?;
        if payload.title.is_empty() && payload.content.is_empty() {
            return Err(AppError::Content(format!(
                "Chapter {} of {} has neither title nor content",
                chapter_number, work_id
            )));
        }

        let chapter = self
            .store
            .put(work_id, chapter_number, &payload.title, &payload.content)?;

        if self.max_bytes > 0 {
            if let Err(e) = self.store.trim_to(self.max_bytes, Some(&chapter.key)) {
                tracing::warn!(work_id = %work_id, error = %e, "Cache trim failed after write");
            }
        }

        tracing::info!(
            work_id = %work_id,
            chapter = chapter_number,
            bytes = chapter.size_bytes,
            "Fetched chapter"
        );
        Ok(chapter)
    }

    /// Best-effort warm-up: fetch the chapter unless it is already cached.
    ///
    /// Never fails. A later `get` may still miss if the download failed.
    pub async fn prefetch(&self, work_id: &str, chapter_number: i64) {
        match self.store.get(work_id, chapter_number) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(work_id = %work_id, chapter = chapter_number, error = %e, "Prefetch lookup failed");
            }
        }

        if let Err(e) = self.fetch_and_cache(work_id, chapter_number).await {
            tracing::debug!(work_id = %work_id, chapter = chapter_number, error = %e, "Prefetch failed");
        }
    }

    /// Prefetch chapters one after another; returns how many are cached afterwards.
    pub async fn prefetch_range<I>(&self, work_id: &str, chapters: I) -> usize
    where
        I: IntoIterator<Item = i64>,
    {
        let mut present = 0;
        for chapter_number in chapters {
            self.prefetch(work_id, chapter_number).await;
            if matches!(self.store.get(work_id, chapter_number), Ok(Some(_))) {
                present += 1;
            }
        }
        present
    }

    /// Cached copy if there is one, otherwise fetch it.
    pub async fn resolve(&self, work_id: &str, chapter_number: i64) -> Result<CachedChapter> {
        if let Some(chapter) = self.store.get(work_id, chapter_number)? {
            return Ok(chapter);
        }
        self.fetch_and_cache(work_id, chapter_number).await
    }
}
