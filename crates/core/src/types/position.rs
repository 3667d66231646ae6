//! Playback positions and the metadata derived from them

use crate::types::{Duration, SegmentId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A segment and an offset into it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackTarget {
    pub segment_id: SegmentId,
    pub offset_ms: u64,
}

impl PlaybackTarget {
    pub fn new(segment_id: SegmentId, offset_ms: u64) -> Self {
        Self {
            segment_id,
            offset_ms,
        }
    }

    /// The start of the given segment
    pub fn start_of(segment_id: SegmentId) -> Self {
        Self::new(segment_id, 0)
    }
}

impl fmt::Display for PlaybackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}ms", self.segment_id, self.offset_ms)
    }
}

/// Facts derived from a position; recomputed on every change, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMetadata {
    /// Progress within the current segment, in `[0.0, 1.0]`
    pub segment_progress: f64,
    /// Progress within the whole book, in `[0.0, 1.0]`
    pub book_progress: f64,
    /// Best-effort remaining time; segments of unknown duration count as zero
    pub remaining_book_time: Duration,
    pub chapter_title: Option<String>,
}

impl PositionMetadata {
    pub fn empty() -> Self {
        Self {
            segment_progress: 0.0,
            book_progress: 0.0,
            remaining_book_time: Duration::ZERO,
            chapter_title: None,
        }
    }
}
