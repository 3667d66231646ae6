//! Player events and their fan-out to subscribers

use crate::sleep_timer::SleepTimerStatus;
use std::fmt;
use std::sync::Mutex;
use storystream_core::{
    AppError, Bookmark, PlaybackRate, PlaybackTarget, PositionMetadata, SegmentId,
};
use tokio::sync::mpsc;

/// Where an event happened
#[derive(Debug, Clone, PartialEq)]
pub struct PositionEvent {
    pub segment_id: SegmentId,
    pub offset_ms: u64,
    pub metadata: PositionMetadata,
}

impl PositionEvent {
    pub fn new(target: &PlaybackTarget, metadata: PositionMetadata) -> Self {
        Self {
            segment_id: target.segment_id.clone(),
            offset_ms: target.offset_ms,
            metadata,
        }
    }

    pub fn target(&self) -> PlaybackTarget {
        PlaybackTarget::new(self.segment_id.clone(), self.offset_ms)
    }
}

/// Classification carried by [`PlayerEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The engine reported a fault; playback continues
    Transport,
    /// The engine cannot continue; playback was stopped
    TransportPermanent,
    /// The awaited segment's link expired; a fresh manifest is needed
    DownloadExpired,
    /// The awaited segment could not be downloaded
    DownloadFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Transport => "transport",
            Self::TransportPermanent => "transport-permanent",
            Self::DownloadExpired => "download-expired",
            Self::DownloadFailed => "download-failed",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    PlaybackPreparing(PositionEvent),
    PlaybackBuffering(PositionEvent),
    PlaybackStarted(PositionEvent),
    /// Periodic position report while playing
    PlaybackProgressUpdate(PositionEvent),
    PlaybackPaused(PositionEvent),
    PlaybackStopped(PositionEvent),
    ChapterCompleted(PositionEvent),
    /// The target segment is not available yet
    ChapterWaiting(PositionEvent),
    CreateBookmark(Bookmark),
    DeleteBookmark(Bookmark),
    PlaybackRateChanged {
        rate: PlaybackRate,
        position: PositionEvent,
    },
    ManifestUpdated,
    SleepTimerChanged {
        old: SleepTimerStatus,
        new: SleepTimerStatus,
    },
    /// The sleep timer ran out; playback pauses next
    SleepTimerFinished,
    Error {
        code: ErrorCode,
        message: String,
        position: PositionEvent,
    },
}

impl PlayerEvent {
    pub fn position(&self) -> Option<&PositionEvent> {
        match self {
            Self::PlaybackPreparing(p)
            | Self::PlaybackBuffering(p)
            | Self::PlaybackStarted(p)
            | Self::PlaybackProgressUpdate(p)
            | Self::PlaybackPaused(p)
            | Self::PlaybackStopped(p)
            | Self::ChapterCompleted(p)
            | Self::ChapterWaiting(p) => Some(p),
            Self::PlaybackRateChanged { position, .. } | Self::Error { position, .. } => {
                Some(position)
            }
            Self::CreateBookmark(_)
            | Self::DeleteBookmark(_)
            | Self::ManifestUpdated
            | Self::SleepTimerChanged { .. }
            | Self::SleepTimerFinished => None,
        }
    }

    pub fn segment_id(&self) -> Option<&SegmentId> {
        match self {
            Self::CreateBookmark(b) | Self::DeleteBookmark(b) => Some(&b.segment_id),
            other => other.position().map(|p| &p.segment_id),
        }
    }

    /// The error an [`PlayerEvent::Error`] stands for, with its severity and
    /// recovery action
    pub fn app_error(&self) -> Option<AppError> {
        let Self::Error {
            code,
            message,
            position,
        } = self
        else {
            return None;
        };

        let segment = position.segment_id.to_string();
        let error = match code {
            ErrorCode::Transport => AppError::TransportError {
                message: message.clone(),
                source: None,
            },
            ErrorCode::TransportPermanent => AppError::TransportFailed {
                message: message.clone(),
            },
            ErrorCode::DownloadExpired => AppError::DownloadExpired {
                segment,
                reason: message.clone(),
            },
            ErrorCode::DownloadFailed => AppError::DownloadFailed {
                segment,
                reason: message.clone(),
            },
        };
        Some(error)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaybackPreparing(_) => "PlaybackPreparing",
            Self::PlaybackBuffering(_) => "PlaybackBuffering",
            Self::PlaybackStarted(_) => "PlaybackStarted",
            Self::PlaybackProgressUpdate(_) => "PlaybackProgressUpdate",
            Self::PlaybackPaused(_) => "PlaybackPaused",
            Self::PlaybackStopped(_) => "PlaybackStopped",
            Self::ChapterCompleted(_) => "ChapterCompleted",
            Self::ChapterWaiting(_) => "ChapterWaiting",
            Self::CreateBookmark(_) => "CreateBookmark",
            Self::DeleteBookmark(_) => "DeleteBookmark",
            Self::PlaybackRateChanged { .. } => "PlaybackRateChanged",
            Self::ManifestUpdated => "ManifestUpdated",
            Self::SleepTimerChanged { .. } => "SleepTimerChanged",
            Self::SleepTimerFinished => "SleepTimerFinished",
            Self::Error { .. } => "Error",
        }
    }
}

impl fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateBookmark(b) | Self::DeleteBookmark(b) => {
                write!(f, "{} {:?} {}@{}ms", self.name(), b.kind, b.segment_id, b.offset_ms)
            }
            Self::PlaybackRateChanged { rate, position } => {
                write!(f, "{} {} {}", self.name(), rate, position.target())
            }
            Self::Error {
                code,
                message,
                position,
            } => write!(f, "{} [{}] {} {}", self.name(), code, message, position.target()),
            Self::SleepTimerChanged { old, new } => write!(f, "{} {} -> {}", self.name(), old, new),
            Self::ManifestUpdated | Self::SleepTimerFinished => f.write_str(self.name()),
            other => match other.position() {
                Some(p) => write!(f, "{} {}", other.name(), p.target()),
                None => f.write_str(other.name()),
            },
        }
    }
}

/// Receiving half of a subscription; ends when the session closes
pub type EventStream = mpsc::UnboundedReceiver<PlayerEvent>;

/// Delivers every event to every live subscriber, in publish order
///
/// After [`EventHub::close`] nothing is delivered and every stream ends.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<PlayerEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Returns `None` once the hub is closed
    pub fn subscribe(&self) -> Option<EventStream> {
        let mut guard = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let subscribers = guard.as_mut()?;
        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.push(tx);
        Some(rx)
    }

    /// Returns false if the hub is closed
    pub fn publish(&self, event: PlayerEvent) -> bool {
        let mut guard = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_mut() {
            Some(subscribers) => {
                log::debug!("event: {}", event);
                subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
                true
            }
            None => false,
        }
    }

    /// Drops every subscriber; idempotent
    pub fn close(&self) {
        let mut guard = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        match self.subscribers.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}
