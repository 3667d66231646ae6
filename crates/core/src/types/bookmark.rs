//! Bookmark domain model

use crate::types::{BookId, PlaybackTarget, PositionMetadata, SegmentId, Timestamp, Validator};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one bookmark within a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkId(Uuid);

impl BookmarkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BookmarkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for BookmarkId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl std::fmt::Display for BookmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a bookmark exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkKind {
    /// Created on request; explicit bookmarks accumulate
    Explicit,
    /// Created automatically while listening; at most one per book is kept
    LastRead,
}

/// A saved position in a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub book_id: BookId,
    pub segment_id: SegmentId,
    pub offset_ms: u64,
    pub kind: BookmarkKind,
    pub created_at: Timestamp,
    pub metadata: PositionMetadata,
    pub note: Option<String>,
}

impl Bookmark {
    /// Creates a bookmark at the given position
    pub fn new(
        book_id: BookId,
        target: PlaybackTarget,
        kind: BookmarkKind,
        metadata: PositionMetadata,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: BookmarkId::new(),
            book_id,
            segment_id: target.segment_id,
            offset_ms: target.offset_ms,
            kind,
            created_at,
            metadata,
            note: None,
        }
    }

    /// The position this bookmark points at
    pub fn target(&self) -> PlaybackTarget {
        PlaybackTarget::new(self.segment_id.clone(), self.offset_ms)
    }

    pub fn is_last_read(&self) -> bool {
        self.kind == BookmarkKind::LastRead
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Returns true if this bookmark has a note
    pub fn has_note(&self) -> bool {
        self.note.as_ref().map_or(false, |n| !n.trim().is_empty())
    }
}

impl Validator for Bookmark {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.segment_id.as_str().trim().is_empty() {
            errors.push("Bookmark segment id cannot be empty".to_string());
        }

        if let Some(note) = &self.note {
            if note.trim().is_empty() {
                errors.push("Bookmark note cannot be empty if set".to_string());
            }
        }

        if !(0.0..=1.0).contains(&self.metadata.book_progress) {
            errors.push("Bookmark book progress must be within [0, 1]".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
