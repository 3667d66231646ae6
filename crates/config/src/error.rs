//! Error types for the configuration system

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file exists but holds nothing but whitespace
    #[error("Config file {path} is empty")]
    Empty { path: PathBuf },

    #[error("Config file {path} is not valid TOML: {source}")]
    Malformed {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Cannot render config as TOML: {0}")]
    Render(#[from] toml::ser::Error),

    /// Refused to persist a config with out-of-range values
    #[error("{} invalid setting(s): {}", .0.len(), join(.0))]
    Invalid(Vec<ValidationError>),

    #[error("Cannot write {path}: {source}")]
    Unwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No config directory is known for this platform")]
    NoConfigDir,
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single setting that is out of range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the setting, e.g. `bookmarks.guard_ms`
    pub field: String,
    pub message: String,
    /// The offending value as written
    pub value: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self {
            value: Some(value.to_string()),
            ..Self::new(field, message)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} = {} {}", self.field, value, self.message),
            None => write!(f, "{} {}", self.field, self.message),
        }
    }
}

impl std::error::Error for ValidationError {}
