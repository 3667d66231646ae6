//! Listening-time accounting records

use crate::types::{BookId, Duration, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a time segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSegmentId(Uuid);

impl TimeSegmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TimeSegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TimeSegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A closed span of wall-clock time spent listening to one book at one rate
///
/// Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSegment {
    pub id: TimeSegmentId,
    pub book_id: BookId,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub rate: f32,
}

impl TimeSegment {
    pub fn new(book_id: BookId, started_at: Timestamp, ended_at: Timestamp, rate: f32) -> Self {
        Self {
            id: TimeSegmentId::new(),
            book_id,
            started_at,
            ended_at,
            rate,
        }
    }

    pub fn duration(&self) -> Duration {
        self.ended_at.duration_since(self.started_at)
    }
}
