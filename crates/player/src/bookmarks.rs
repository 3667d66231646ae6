//! Automatic last-read bookmarks and bookmark persistence

use crate::error::{PlayerError, PlayerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use storystream_config::BookmarkConfig;
use storystream_core::{BookId, Bookmark, BookmarkId, BookmarkKind, Duration, Timestamp, Validator};
use tempfile::NamedTempFile;

/// Decides when a progress update should become a last-read bookmark
///
/// Offsets below the guard are ignored. A bookmark is produced only once
/// strictly more than the wait period of wall-clock time has passed since the
/// previous one; the first window opens when the heuristic is created.
#[derive(Debug, Clone)]
pub struct BookmarkHeuristic {
    enabled: bool,
    guard_ms: u64,
    wait_period: Duration,
    window_start: Timestamp,
}

impl BookmarkHeuristic {
    pub fn new(config: &BookmarkConfig, now: Timestamp) -> Self {
        Self {
            enabled: config.enabled,
            guard_ms: config.guard_ms,
            wait_period: Duration::from_seconds(config.wait_period_secs),
            window_start: now,
        }
    }

    /// Returns true if a last-read bookmark should be written at `offset_ms`
    pub fn on_progress(&mut self, offset_ms: u64, now: Timestamp) -> bool {
        if !self.enabled || offset_ms < self.guard_ms {
            return false;
        }

        if now.duration_since(self.window_start) <= self.wait_period {
            return false;
        }

        self.window_start = now;
        true
    }
}

/// Persistence for bookmarks
///
/// Saving a `LastRead` bookmark replaces the book's previous one; explicit
/// bookmarks accumulate.
pub trait BookmarkStore: Send + Sync {
    fn save(&self, bookmark: &Bookmark) -> PlayerResult<()>;

    /// Returns true if a bookmark was removed
    fn delete(&self, id: BookmarkId) -> PlayerResult<bool>;

    fn last_read(&self, book_id: BookId) -> PlayerResult<Option<Bookmark>>;

    /// Every bookmark of a book, oldest first
    fn bookmarks(&self, book_id: BookId) -> PlayerResult<Vec<Bookmark>>;
}

/// Bookmarks of every book, as stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BookmarkShelf {
    books: HashMap<BookId, Vec<Bookmark>>,
}

impl BookmarkShelf {
    fn save(&mut self, bookmark: &Bookmark) {
        let marks = self.books.entry(bookmark.book_id).or_default();
        if bookmark.kind == BookmarkKind::LastRead {
            marks.retain(|b| b.kind != BookmarkKind::LastRead);
        }
        marks.push(bookmark.clone());
    }

    fn delete(&mut self, id: BookmarkId) -> bool {
        let mut removed = false;
        for marks in self.books.values_mut() {
            let before = marks.len();
            marks.retain(|b| b.id != id);
            removed |= marks.len() != before;
        }
        self.books.retain(|_, marks| !marks.is_empty());
        removed
    }

    fn last_read(&self, book_id: BookId) -> Option<Bookmark> {
        self.books
            .get(&book_id)?
            .iter()
            .find(|b| b.is_last_read())
            .cloned()
    }

    /// Drops bookmarks that fail validation; returns how many were dropped
    fn discard_invalid(&mut self) -> usize {
        let mut dropped = 0;
        for marks in self.books.values_mut() {
            marks.retain(|b| match b.validate() {
                Ok(()) => true,
                Err(errors) => {
                    log::warn!("Discarding bookmark {}: {}", b.id, errors.join("; "));
                    dropped += 1;
                    false
                }
            });
        }
        self.books.retain(|_, marks| !marks.is_empty());
        dropped
    }

    fn bookmarks(&self, book_id: BookId) -> Vec<Bookmark> {
        self.books.get(&book_id).cloned().unwrap_or_default()
    }
}

fn lock(shelf: &Mutex<BookmarkShelf>) -> MutexGuard<'_, BookmarkShelf> {
    match shelf.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keeps bookmarks for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryBookmarkStore {
    shelf: Mutex<BookmarkShelf>,
}

impl InMemoryBookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookmarkStore for InMemoryBookmarkStore {
    fn save(&self, bookmark: &Bookmark) -> PlayerResult<()> {
        lock(&self.shelf).save(bookmark);
        Ok(())
    }

    fn delete(&self, id: BookmarkId) -> PlayerResult<bool> {
        Ok(lock(&self.shelf).delete(id))
    }

    fn last_read(&self, book_id: BookId) -> PlayerResult<Option<Bookmark>> {
        Ok(lock(&self.shelf).last_read(book_id))
    }

    fn bookmarks(&self, book_id: BookId) -> PlayerResult<Vec<Bookmark>> {
        Ok(lock(&self.shelf).bookmarks(book_id))
    }
}

/// Stores every book's bookmarks in one JSON file
///
/// The file is rewritten atomically on every change. A missing file is an
/// empty store; an unreadable one is reported as corrupted and left untouched.
#[derive(Debug)]
pub struct JsonFileBookmarkStore {
    path: PathBuf,
    shelf: Mutex<BookmarkShelf>,
}

impl JsonFileBookmarkStore {
    pub fn open(path: impl Into<PathBuf>) -> PlayerResult<Self> {
        let path = path.into();
        let shelf = Self::read(&path)?;
        log::debug!(
            "Loaded bookmarks for {} books from {}",
            shelf.books.len(),
            path.display()
        );
        Ok(Self {
            path,
            shelf: Mutex::new(shelf),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> PlayerResult<BookmarkShelf> {
        if !path.exists() {
            return Ok(BookmarkShelf::default());
        }

        let contents = fs::read_to_string(path)?;
        let mut shelf: BookmarkShelf =
            serde_json::from_str(&contents).map_err(|e| PlayerError::CorruptedStore {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        shelf.discard_invalid();
        Ok(shelf)
    }

    fn write(&self, shelf: &BookmarkShelf) -> PlayerResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(shelf)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(json.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|e| PlayerError::IoError(e.error))?;
        Ok(())
    }

    fn modify<T>(&self, change: impl FnOnce(&mut BookmarkShelf) -> T) -> PlayerResult<T> {
        let mut shelf = lock(&self.shelf);
        let mut updated = shelf.clone();
        let result = change(&mut updated);
        self.write(&updated)?;
        *shelf = updated;
        Ok(result)
    }
}

impl BookmarkStore for JsonFileBookmarkStore {
    fn save(&self, bookmark: &Bookmark) -> PlayerResult<()> {
        self.modify(|shelf| shelf.save(bookmark))
    }

    fn delete(&self, id: BookmarkId) -> PlayerResult<bool> {
        self.modify(|shelf| shelf.delete(id))
    }

    fn last_read(&self, book_id: BookId) -> PlayerResult<Option<Bookmark>> {
        Ok(lock(&self.shelf).last_read(book_id))
    }

    fn bookmarks(&self, book_id: BookId) -> PlayerResult<Vec<Bookmark>> {
        Ok(lock(&self.shelf).bookmarks(book_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storystream_core::{PlaybackTarget, PositionMetadata, SegmentId};
    use tempfile::TempDir;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_millis(secs * 1000)
    }

    fn heuristic() -> BookmarkHeuristic {
        BookmarkHeuristic::new(&BookmarkConfig::default(), at(0))
    }

    fn bookmark(book: BookId, offset_ms: u64, kind: BookmarkKind) -> Bookmark {
        Bookmark::new(
            book,
            PlaybackTarget::new(SegmentId::new("s0"), offset_ms),
            kind,
            PositionMetadata::empty(),
            Timestamp::from_millis(offset_ms as i64),
        )
    }

    #[test]
    fn test_guard_suppresses_early_offsets() {
        let mut h = heuristic();
        assert!(!h.on_progress(0, at(100)));
        assert!(!h.on_progress(2_999, at(200)));
        assert!(h.on_progress(3_000, at(300)));
    }

    #[test]
    fn test_at_most_one_per_wait_period() {
        let mut h = heuristic();
        assert!(h.on_progress(60_000, at(16)));
        assert!(!h.on_progress(61_000, at(17)));
        assert!(!h.on_progress(70_000, at(30)));
        assert!(h.on_progress(75_000, at(32)));
    }

    #[test]
    fn test_window_opens_at_creation() {
        let mut h = heuristic();
        assert!(!h.on_progress(10_000, at(5)));
        assert!(h.on_progress(20_000, at(16)));
    }

    #[test]
    fn test_exactly_one_wait_period_is_too_soon() {
        let mut h = heuristic();
        assert!(!h.on_progress(60_000, at(15)));
        assert!(h.on_progress(60_000, Timestamp::from_millis(15_001)));
    }

    #[test]
    fn test_disabled_never_fires() {
        let config = BookmarkConfig {
            enabled: false,
            ..BookmarkConfig::default()
        };
        let mut h = BookmarkHeuristic::new(&config, at(0));
        assert!(!h.on_progress(60_000, at(1_000)));
    }

    #[test]
    fn test_last_read_replaces_explicit_accumulates() {
        let store = InMemoryBookmarkStore::new();
        let book = BookId::new();

        store.save(&bookmark(book, 1_000, BookmarkKind::LastRead)).unwrap();
        store.save(&bookmark(book, 2_000, BookmarkKind::LastRead)).unwrap();
        store.save(&bookmark(book, 3_000, BookmarkKind::Explicit)).unwrap();
        store.save(&bookmark(book, 4_000, BookmarkKind::Explicit)).unwrap();

        assert_eq!(store.last_read(book).unwrap().unwrap().offset_ms, 2_000);
        assert_eq!(store.bookmarks(book).unwrap().len(), 3);
        assert!(store.last_read(BookId::new()).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let store = InMemoryBookmarkStore::new();
        let book = BookId::new();
        let mark = bookmark(book, 5_000, BookmarkKind::Explicit);
        store.save(&mark).unwrap();

        assert!(store.delete(mark.id).unwrap());
        assert!(!store.delete(mark.id).unwrap());
        assert!(store.bookmarks(book).unwrap().is_empty());
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookmarks.json");
        let book = BookId::new();

        {
            let store = JsonFileBookmarkStore::open(&path).unwrap();
            store.save(&bookmark(book, 9_000, BookmarkKind::LastRead)).unwrap();
            store.save(&bookmark(book, 4_000, BookmarkKind::Explicit)).unwrap();
        }

        let store = JsonFileBookmarkStore::open(&path).unwrap();
        assert_eq!(store.last_read(book).unwrap().unwrap().offset_ms, 9_000);
        assert_eq!(store.bookmarks(book).unwrap().len(), 2);
    }

    #[test]
    fn test_json_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileBookmarkStore::open(dir.path().join("none.json")).unwrap();
        assert!(store.bookmarks(BookId::new()).unwrap().is_empty());
    }

    #[test]
    fn test_json_store_drops_invalid_bookmarks_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookmarks.json");
        let book = BookId::new();
        let mut broken = bookmark(book, 7_000, BookmarkKind::Explicit);
        broken.metadata.book_progress = 2.0;

        {
            let store = JsonFileBookmarkStore::open(&path).unwrap();
            store.save(&broken).unwrap();
            store.save(&bookmark(book, 8_000, BookmarkKind::LastRead)).unwrap();
        }

        let store = JsonFileBookmarkStore::open(&path).unwrap();
        let marks = store.bookmarks(book).unwrap();
        assert_eq!(marks.len(), 1);
        assert!(marks[0].is_last_read());
    }

    #[test]
    fn test_json_store_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookmarks.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileBookmarkStore::open(&path).unwrap_err();
        assert!(matches!(err, PlayerError::CorruptedStore { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
