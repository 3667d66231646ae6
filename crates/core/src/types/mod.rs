//! Domain types for StoryStream
//!
//! This module contains all domain models organized by responsibility:
//! - `book`: Book identity
//! - `reading_order`: Segments and the immutable order they are played in
//! - `segment_status`: Download/availability status of a segment
//! - `position`: Playback targets and derived position metadata
//! - `playback`: Playback rate
//! - `bookmark`: Saved positions
//! - `listening`: Listening-time records
//! - `common`: Shared traits and utilities

mod book;
mod bookmark;
mod common;
mod listening;
mod playback;
mod position;
mod reading_order;
mod segment_status;

// Re-export all public types
pub use book::BookId;
pub use bookmark::{Bookmark, BookmarkId, BookmarkKind};
pub use common::{Duration, Timestamp, Validator};
pub use listening::{TimeSegment, TimeSegmentId};
pub use playback::{PlaybackRate, MAX_RATE, MIN_RATE};
pub use position::{PlaybackTarget, PositionMetadata};
pub use reading_order::{ReadingOrder, Segment, SegmentDescriptor, SegmentId};
pub use segment_status::SegmentStatus;
