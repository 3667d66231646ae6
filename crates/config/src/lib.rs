//! StoryStream Configuration System
//!
//! Settings that shape a playback session: whether segments may be streamed,
//! how often the position is broadcast, when automatic bookmarks are taken and
//! how listening time is chunked.
//!
//! # Architecture
//!
//! - **Trait-based**: Each concern defines its config as a type implementing `ConfigSection`
//! - **Graceful degradation**: Invalid configs fall back to defaults with warnings
//! - **Atomic writes**: Config files are never left in a corrupted state
//!
//! # Example
//!
//! ```rust,no_run
//! use storystream_config::{Config, ConfigManager};
//!
//! let manager = ConfigManager::new().expect("Failed to initialize config");
//! let config = manager.load().unwrap_or_else(|e| {
//!     eprintln!("Config error: {}, using defaults", e);
//!     Config::default()
//! });
//!
//! println!("Broadcast every {}ms", config.player.position_broadcast_ms);
//! ```

mod error;
mod manager;
mod persistence;
mod validation;

// Config sections
mod bookmark_config;
mod listening_config;
mod player_config;

pub use error::{ConfigError, ConfigResult, ValidationError};
pub use manager::ConfigManager;
pub use validation::{ConfigSection, Validator};

pub use bookmark_config::BookmarkConfig;
pub use listening_config::ListeningConfig;
pub use player_config::PlayerConfig;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    /// Session and transport behavior
    pub player: PlayerConfig,

    /// Automatic "last read" bookmark policy
    pub bookmarks: BookmarkConfig,

    /// Listening-time accounting
    pub listening: ListeningConfig,
}

impl Config {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the entire configuration
    ///
    /// Returns all validation errors found across all sections.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.player.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.bookmarks.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.listening.validate() {
            errors.append(&mut e);
        }

        // The heuristic needs at least one progress update per wait period
        let cross_checks = [
            Validator::not_longer_than(
                self.player.position_broadcast_ms,
                "player.position_broadcast_ms",
                self.bookmarks.wait_period_secs.saturating_mul(1000),
                "bookmarks.wait_period_secs",
            ),
            Validator::not_longer_than(
                self.listening.tick_ms,
                "listening.tick_ms",
                self.listening.max_segment_secs.saturating_mul(1000),
                "listening.max_segment_secs",
            ),
        ];
        errors.extend(cross_checks.into_iter().filter_map(Result::err));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merges this config with another, preferring values from `other`
    ///
    /// Used for override chains: defaults < file < env vars < CLI args
    pub fn merge(&mut self, other: Config) {
        self.player.merge(other.player);
        self.bookmarks.merge(other.bookmarks);
        self.listening.merge(other.listening);
    }

    /// Renders the configuration as it would be written to disk
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(ConfigError::Render)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            player: PlayerConfig::default(),
            bookmarks: BookmarkConfig::default(),
            listening: ListeningConfig::default(),
        }
    }
}
