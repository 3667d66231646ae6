//! Error types and recovery strategies for StoryStream
//!
//! Errors are classified into three severity tiers:
//! - **Recoverable**: the operation can be retried (a transient transport fault)
//! - **Degraded**: playback of a segment is unavailable but the session continues
//! - **Fatal**: the session or its persisted state cannot be used any more
//!
//! Each error carries a recovery action that hosts can use to decide what to
//! do next without matching on every variant.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Recovery actions that can be taken when an error occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry the operation immediately
    RetryImmediate,
    /// Retry with exponential backoff
    RetryWithBackoff,
    /// Fetch a fresh manifest; the segment's link is no longer valid
    RefreshManifest,
    /// Discard the session and open a new one
    ReopenSession,
    /// No automatic recovery - user intervention required
    UserIntervention,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryImmediate => write!(f, "Retrying immediately"),
            Self::RetryWithBackoff => write!(f, "Retrying with backoff"),
            Self::RefreshManifest => write!(f, "Refreshing manifest"),
            Self::ReopenSession => write!(f, "Reopening session"),
            Self::UserIntervention => write!(f, "User intervention required"),
        }
    }
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Error can be automatically recovered from
    Recoverable,
    /// Feature degraded but the session can continue
    Degraded,
    /// Critical error requiring a new session or user action
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable => write!(f, "Recoverable"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Fatal => write!(f, "Fatal"),
        }
    }
}

/// Main error type for StoryStream
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Reading order =====
    /// The reading order could not be built
    #[error("Invalid reading order: {reason}")]
    InvalidReadingOrder { reason: String },

    /// Two segments share an id
    #[error("Duplicate segment id: {id}")]
    DuplicateSegment { id: String },

    // ===== Session lifecycle =====
    /// Operation not allowed in the current lifecycle state, usually after close
    #[error("Illegal state: {operation}")]
    IllegalState { operation: String },

    // ===== Transport =====
    /// The transport engine reported a fault that may clear on retry
    #[error("Transport error: {message}")]
    TransportError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The transport engine cannot continue with the current segment
    #[error("Transport failed: {message}")]
    TransportFailed { message: String },

    /// Rate outside the supported range
    #[error("Invalid playback rate: {rate}")]
    InvalidRate { rate: f32 },

    // ===== Downloads =====
    /// Fetching a segment failed
    #[error("Download of segment '{segment}' failed: {reason}")]
    DownloadFailed { segment: String, reason: String },

    /// A segment's link expired before it could be fetched
    #[error("Download of segment '{segment}' expired: {reason}")]
    DownloadExpired { segment: String, reason: String },

    // ===== Persistence =====
    /// Reading or writing persisted state failed
    #[error("Persistence error: {message}")]
    PersistenceError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A bookmark store exists but cannot be parsed
    #[error("Bookmark store corrupted at {path}: {reason}")]
    CorruptedBookmarkStore { path: PathBuf, reason: String },

    /// General I/O error
    #[error("I/O error: {message}")]
    IoError {
        message: String,
        #[source]
        source: io::Error,
    },
}

impl AppError {
    /// Returns the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::TransportError { .. }
            | Self::PersistenceError { .. }
            | Self::IoError { .. } => ErrorSeverity::Recoverable,

            Self::TransportFailed { .. }
            | Self::DownloadFailed { .. }
            | Self::DownloadExpired { .. }
            | Self::InvalidRate { .. } => ErrorSeverity::Degraded,

            Self::InvalidReadingOrder { .. }
            | Self::DuplicateSegment { .. }
            | Self::IllegalState { .. }
            | Self::CorruptedBookmarkStore { .. } => ErrorSeverity::Fatal,
        }
    }

    /// Returns the recommended recovery action for this error
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::TransportError { .. } => RecoveryAction::RetryImmediate,

            Self::DownloadFailed { .. } | Self::PersistenceError { .. } | Self::IoError { .. } => {
                RecoveryAction::RetryWithBackoff
            }

            Self::DownloadExpired { .. } => RecoveryAction::RefreshManifest,

            Self::IllegalState { .. } | Self::TransportFailed { .. } => {
                RecoveryAction::ReopenSession
            }

            _ => RecoveryAction::UserIntervention,
        }
    }

    /// Returns a user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidReadingOrder { .. } | Self::DuplicateSegment { .. } => {
                "This book's table of contents is invalid.".to_string()
            }
            Self::IllegalState { .. } => "The player is no longer open.".to_string(),
            Self::TransportError { .. } => {
                "Playback was interrupted. Retrying...".to_string()
            }
            Self::TransportFailed { .. } => "This chapter cannot be played.".to_string(),
            Self::InvalidRate { rate } => format!("{}x is not a supported speed.", rate),
            Self::DownloadFailed { .. } => {
                "This chapter could not be downloaded. Please try again.".to_string()
            }
            Self::DownloadExpired { .. } => {
                "The link to this chapter has expired. Refreshing...".to_string()
            }
            Self::PersistenceError { .. } | Self::IoError { .. } => {
                "Your place in the book could not be saved.".to_string()
            }
            Self::CorruptedBookmarkStore { .. } => {
                "Saved bookmarks are damaged and cannot be read.".to_string()
            }
        }
    }

    /// Returns true if this error should be logged at ERROR level
    pub fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }

    /// Returns true if this error can be automatically retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.recovery_action(),
            RecoveryAction::RetryImmediate | RecoveryAction::RetryWithBackoff
        )
    }

    /// Error for an operation attempted after close
    pub fn illegal_state(operation: impl Into<String>) -> Self {
        Self::IllegalState {
            operation: operation.into(),
        }
    }

    /// Helper to create a transport error from any error type
    pub fn transport<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::TransportError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Helper to create a persistence error from any error type
    pub fn persistence<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::PersistenceError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Convenience type alias for Results using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
            source: err,
        }
    }
}
