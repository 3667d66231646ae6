//! Player - reading-order playback orchestration for StoryStream
//!
//! Opens a book as a [`PlayerSession`] that drives a [`TransportEngine`]
//! through the book's segments, waits for segments that are not downloaded
//! yet, and reports everything as [`PlayerEvent`]s. A [`SleepTimer`] can
//! pause the session after a while or at the end of a chapter.

mod bookmarks;
mod clock;
mod downloads;
mod error;
mod events;
mod listening;
mod position;
mod reconciler;
mod session;
mod sleep_timer;
mod status_table;
mod transport;

pub use bookmarks::{BookmarkHeuristic, BookmarkStore, InMemoryBookmarkStore, JsonFileBookmarkStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use downloads::{DownloadTasks, SegmentDownloader};
pub use error::{PlayerError, PlayerResult};
pub use events::{ErrorCode, EventHub, EventStream, PlayerEvent, PositionEvent};
pub use listening::{ListeningTimeAccumulator, TimeTracker, TimeTrackerHandle, TrackerCommand};
pub use position::{PositionTracker, SeekResolution, SegmentDuration};
pub use reconciler::{ErrorDisposition, PlaybackStatus, StatusTransition, TransportReconciler};
pub use session::{
    PauseReason, PlaybackIntention, PlayerSession, SessionBuilder, SessionSnapshot, SessionState,
};
pub use sleep_timer::{SleepTimer, SleepTimerConfiguration, SleepTimerEvent, SleepTimerStatus};
pub use status_table::{SegmentStatusTable, SegmentStatusUpdate};
pub use transport::{
    RawTransportState, SourceMode, TransportEngine, TransportEvent, TransportFault,
    TransportListener, TransportResult,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_exports_accessible() {
        let _ = SessionState::Closed;
        let _ = PlaybackIntention::ShouldPause;
        let _ = TransportReconciler::new();
        let _ = PauseReason::SleepTimer;
        let _ = SleepTimerConfiguration::EndOfChapter;
    }

    #[test]
    fn test_error_display() {
        let error = PlayerError::InvalidRate(5.0);
        assert!(format!("{}", error).contains("5"));
    }
}
