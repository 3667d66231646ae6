//! Configuration manager - main API for config operations

use crate::persistence;
use crate::{Config, ConfigError, ConfigResult};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";

/// An environment variable that overrides one setting
struct EnvOverride {
    var: &'static str,
    apply: fn(&mut Config, &str) -> bool,
}

fn parsed<T: std::str::FromStr>(raw: &str, set: impl FnOnce(T)) -> bool {
    match raw.trim().parse::<T>() {
        Ok(value) => {
            set(value);
            true
        }
        Err(_) => false,
    }
}

const ENV_OVERRIDES: &[EnvOverride] = &[
    EnvOverride {
        var: "STORYSTREAM_PLAYER_STREAMING_PERMITTED",
        apply: |config, raw| parsed(raw, |v| config.player.streaming_permitted = v),
    },
    EnvOverride {
        var: "STORYSTREAM_PLAYER_DEFAULT_RATE",
        apply: |config, raw| parsed(raw, |v| config.player.default_rate = v),
    },
    EnvOverride {
        var: "STORYSTREAM_BOOKMARKS_WAIT_PERIOD_SECS",
        apply: |config, raw| parsed(raw, |v| config.bookmarks.wait_period_secs = v),
    },
];

/// Owns the location of `config.toml` and every operation on it
///
/// The default location is the platform config directory:
///
/// - Linux: `~/.config/storystream/`
/// - macOS: `~/Library/Application Support/storystream/`
/// - Windows: `%APPDATA%\storystream\`
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> ConfigResult<Self> {
        let dirs = ProjectDirs::from("", "", "storystream").ok_or(ConfigError::NoConfigDir)?;
        Self::with_directory(dirs.config_dir().to_path_buf())
    }

    /// Uses `config_dir` instead of the platform directory; it is created on
    /// the first save
    pub fn with_directory(config_dir: PathBuf) -> ConfigResult<Self> {
        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Loads the config file, or the defaults if there is none
    ///
    /// A file that exists but cannot be parsed is an error.
    pub fn load(&self) -> ConfigResult<Config> {
        persistence::read(&self.config_path())
    }

    /// Loads the config file, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        self.load().unwrap_or_else(|e| {
            log::warn!("{}, using default config", e);
            Config::default()
        })
    }

    /// Validates and atomically writes `config`
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        persistence::write(&self.config_path(), config)
    }

    /// Loads the config, applies `update_fn` and saves the result
    ///
    /// Nothing is written if the updated config is invalid.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use storystream_config::ConfigManager;
    /// # let manager = ConfigManager::new().unwrap();
    /// manager.update(|config| {
    ///     config.player.streaming_permitted = true;
    /// }).expect("Failed to update config");
    /// ```
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes the defaults unless a config file exists
    ///
    /// Returns true if a file was written.
    pub fn initialize(&self) -> ConfigResult<bool> {
        let path = self.config_path();
        if path.exists() {
            log::debug!("Config already present at {}", path.display());
            return Ok(false);
        }

        self.save(&Config::default())?;
        log::info!("Wrote default config to {}", path.display());
        Ok(true)
    }

    pub fn reset(&self) -> ConfigResult<()> {
        self.save(&Config::default())
    }

    /// Lists every out-of-range value in the config file
    pub fn validate(&self) -> ConfigResult<Vec<String>> {
        let problems = match self.load()?.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors.iter().map(ToString::to_string).collect(),
        };
        Ok(problems)
    }

    /// Loads the config file and applies `STORYSTREAM_<SECTION>_<FIELD>`
    /// environment overrides
    ///
    /// Unparseable override values are ignored with a warning.
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;
        apply_env_overrides(&mut config, |var| std::env::var(var).ok());

        if let Err(errors) = config.validate() {
            log::warn!(
                "Config is invalid after environment overrides: {}",
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }
        Ok(config)
    }
}

/// Applies every override `lookup` knows a value for; returns how many applied
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> usize {
    let mut applied = 0;
    for over in ENV_OVERRIDES {
        let Some(raw) = lookup(over.var) else {
            continue;
        };
        if (over.apply)(config, &raw) {
            log::debug!("Config override from {}", over.var);
            applied += 1;
        } else {
            log::warn!("Ignoring unparseable value '{}' for {}", raw, over.var);
        }
    }
    applied
}
