//! Download/availability status of a segment

use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability of one segment's audio on this device
///
/// `Expired` and `Failed` are distinct so that callers can choose between
/// fetching a fresh link (expired) and retrying the same one (failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SegmentStatus {
    NotDownloaded,
    Downloading { percent: u8 },
    Downloaded,
    Expired { reason: String },
    Failed { reason: String },
}

impl SegmentStatus {
    /// Creates a downloading status, clamping the percentage to 100
    pub fn downloading(percent: u8) -> Self {
        Self::Downloading {
            percent: percent.min(100),
        }
    }

    pub fn expired(reason: impl Into<String>) -> Self {
        Self::Expired {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded)
    }

    /// True for statuses that will not change without an external action
    /// (a new fetch or a refreshed manifest)
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Expired { .. } | Self::Failed { .. })
    }
}

impl Default for SegmentStatus {
    fn default() -> Self {
        Self::NotDownloaded
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDownloaded => write!(f, "not downloaded"),
            Self::Downloading { percent } => write!(f, "downloading ({}%)", percent),
            Self::Downloaded => write!(f, "downloaded"),
            Self::Expired { reason } => write!(f, "expired: {}", reason),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}
