//! Core domain model for StoryStream playback
//!
//! Shared by the player, configuration and command-line crates.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{AppError, ErrorSeverity, RecoveryAction, Result};
pub use types::{
    BookId, Bookmark, BookmarkId, BookmarkKind, Duration, PlaybackRate, PlaybackTarget,
    PositionMetadata, ReadingOrder, Segment, SegmentDescriptor, SegmentId, SegmentStatus,
    TimeSegment, Timestamp, Validator,
};
