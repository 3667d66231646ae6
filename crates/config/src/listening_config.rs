//! Listening-time accounting configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Listening-time accounting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListeningConfig {
    /// Longest time segment emitted; longer play periods are split
    pub max_segment_secs: u64,

    /// How often the tracker worker checks for completed chunks
    pub tick_ms: u64,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            max_segment_secs: 60,
            tick_ms: 1000,
        }
    }
}

impl ConfigSection for ListeningConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(self.max_segment_secs, 1, 3600, "listening.max_segment_secs"),
            Validator::in_range(self.tick_ms, 10, 60_000, "listening.tick_ms"),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.max_segment_secs = other.max_segment_secs;
        self.tick_ms = other.tick_ms;
    }

    fn section_name(&self) -> &'static str {
        "listening"
    }
}
