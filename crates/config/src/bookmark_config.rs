//! Automatic bookmark configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Policy for automatic "last read" bookmarks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BookmarkConfig {
    /// Create last-read bookmarks while listening
    pub enabled: bool,

    /// Offsets into a segment below this are never bookmarked
    pub guard_ms: u64,

    /// Minimum wall-clock time between two last-read bookmarks
    pub wait_period_secs: u64,
}

impl Default for BookmarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            guard_ms: 3000,
            wait_period_secs: 15,
        }
    }
}

impl ConfigSection for BookmarkConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(self.guard_ms, 0, 60_000, "bookmarks.guard_ms"),
            Validator::in_range(self.wait_period_secs, 1, 600, "bookmarks.wait_period_secs"),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.enabled = other.enabled;
        self.guard_ms = other.guard_ms;
        self.wait_period_secs = other.wait_period_secs;
    }

    fn section_name(&self) -> &'static str {
        "bookmarks"
    }
}
