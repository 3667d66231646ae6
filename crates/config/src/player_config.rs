//! Player configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Session and transport behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Allow playing segments that are not downloaded but have a remote link
    pub streaming_permitted: bool,

    /// Interval of the position broadcast while playing, in milliseconds
    pub position_broadcast_ms: u64,

    /// Playback rate applied when a session opens (0.5 - 3.0)
    pub default_rate: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            streaming_permitted: false,
            position_broadcast_ms: 500,
            default_rate: 1.0,
        }
    }
}

impl ConfigSection for PlayerConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(
                self.position_broadcast_ms,
                100,
                5000,
                "player.position_broadcast_ms",
            ),
            Validator::in_range(self.default_rate, 0.5, 3.0, "player.default_rate"),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.streaming_permitted = other.streaming_permitted;
        self.position_broadcast_ms = other.position_broadcast_ms;
        self.default_rate = other.default_rate;
    }

    fn section_name(&self) -> &'static str {
        "player"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.streaming_permitted);
    }

    #[test]
    fn test_invalid_broadcast_interval() {
        let mut config = PlayerConfig::default();
        config.position_broadcast_ms = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_rate() {
        let mut config = PlayerConfig::default();
        config.default_rate = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge() {
        let mut base = PlayerConfig::default();
        let other = PlayerConfig {
            streaming_permitted: true,
            default_rate: 1.5,
            ..Default::default()
        };

        base.merge(other);
        assert!(base.streaming_permitted);
        assert_eq!(base.default_rate, 1.5);
    }

    #[test]
    fn test_multiple_validation_errors() {
        let config = PlayerConfig {
            position_broadcast_ms: 10_000,
            default_rate: 0.1,
            ..Default::default()
        };

        let result = config.validate();
        assert_eq!(result.unwrap_err().len(), 2);
    }

    #[test]
    fn test_section_name() {
        assert_eq!(PlayerConfig::default().section_name(), "player");
    }
}
