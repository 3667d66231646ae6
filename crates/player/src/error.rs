use std::path::PathBuf;
use storystream_core::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid rate: {0}")]
    InvalidRate(f32),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Bookmark store corrupted at {path}: {reason}")]
    CorruptedStore { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PlayerError {
    /// `operation` was called after close
    pub fn illegal_state(operation: &str) -> Self {
        Self::IllegalState(format!("{} after close", operation))
    }

    /// `operation` was called before anything was opened
    pub fn not_open(operation: &str) -> Self {
        Self::IllegalState(format!("{} before a book was opened", operation))
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;

impl From<PlayerError> for AppError {
    fn from(err: PlayerError) -> Self {
        match err {
            PlayerError::IllegalState(message) => AppError::IllegalState { operation: message },
            PlayerError::InvalidRate(rate) => AppError::InvalidRate { rate },
            PlayerError::TransportError(message) => AppError::TransportFailed { message },
            PlayerError::CorruptedStore { path, reason } => {
                AppError::CorruptedBookmarkStore { path, reason }
            }
            PlayerError::SerializationError(e) => {
                AppError::persistence("bookmark serialization failed", e)
            }
            PlayerError::IoError(e) => AppError::from(e),
        }
    }
}
