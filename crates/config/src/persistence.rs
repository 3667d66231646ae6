//! Reading and writing `config.toml`
//!
//! Writes go to a temporary file in the target directory which is then
//! renamed over the old file, so readers see either the old or the new
//! config. The previous file is kept next to it as `config.toml.bak`.

use crate::{Config, ConfigError, ConfigResult, CONFIG_VERSION};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Where the previous version of `path` is kept
pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Loads the config at `path`; a missing file yields the defaults
///
/// Out-of-range values are logged and kept so they can be inspected and
/// fixed; an empty or malformed file is an error.
pub(crate) fn read(path: &Path) -> ConfigResult<Config> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if contents.trim().is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_path_buf(),
        });
    }

    let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    if config.version != CONFIG_VERSION {
        log::warn!(
            "{} has config version {}, expected {}",
            path.display(),
            config.version,
            CONFIG_VERSION
        );
    }
    if let Err(errors) = config.validate() {
        for error in &errors {
            log::warn!("{}: {}", path.display(), error);
        }
    }

    Ok(config)
}

/// Validates `config` and atomically replaces the file at `path`
pub(crate) fn write(path: &Path, config: &Config) -> ConfigResult<()> {
    config.validate().map_err(ConfigError::Invalid)?;
    let rendered = config.to_toml()?;

    let unwritable = |source: std::io::Error| ConfigError::Unwritable {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(unwritable)?;
        log::info!("Created config directory {}", dir.display());
    }

    if path.exists() {
        let backup = backup_path(path);
        fs::copy(path, &backup).map_err(unwritable)?;
        log::debug!("Kept previous config as {}", backup.display());
    }

    let mut temp = NamedTempFile::new_in(dir).map_err(unwritable)?;
    temp.write_all(rendered.as_bytes()).map_err(unwritable)?;
    temp.flush().map_err(unwritable)?;
    temp.persist(path).map_err(|e| unwritable(e.error))?;

    log::info!("Config saved to {}", path.display());
    Ok(())
}
