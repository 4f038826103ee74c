// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks durations, toolchain templates and the default language.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Resolve the configuration used at startup.
///
/// - An explicit path must exist and validate.
/// - Without one, [`default_config_path`] is used if present.
/// - Otherwise the built-in defaults apply.
pub fn load_or_default(path: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = path {
        return load_and_validate(path);
    }

    let fallback = default_config_path();
    if fallback.is_file() {
        debug!(path = %fallback.display(), "using config from working directory");
        return load_and_validate(fallback);
    }

    debug!("no config file found; using built-in defaults");
    ConfigFile::try_from(RawConfigFile::default())
}

/// `liverun.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("liverun.toml")
}
