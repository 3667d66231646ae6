//! Playback rate

use crate::types::Validator;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slowest supported rate
pub const MIN_RATE: f32 = 0.5;
/// Fastest supported rate
pub const MAX_RATE: f32 = 3.0;

/// Playback rate multiplier (0.5x - 3.0x)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PlaybackRate(f32);

impl PlaybackRate {
    pub const NORMAL: PlaybackRate = PlaybackRate(1.0);

    /// Creates a new playback rate, rejecting values outside 0.5 - 3.0
    pub fn new(rate: f32) -> Result<Self, String> {
        if !rate.is_finite() || !(MIN_RATE..=MAX_RATE).contains(&rate) {
            Err(format!(
                "Rate must be between {} and {}, got {}",
                MIN_RATE, MAX_RATE, rate
            ))
        } else {
            Ok(Self(rate))
        }
    }

    /// Creates a playback rate without validation (for deserialization)
    pub fn new_unchecked(rate: f32) -> Self {
        Self(rate)
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Default for PlaybackRate {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for PlaybackRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

impl Validator for PlaybackRate {
    fn validate(&self) -> Result<(), Vec<String>> {
        Self::new(self.0).map(|_| ()).map_err(|e| vec![e])
    }
}
