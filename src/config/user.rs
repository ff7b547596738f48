//! User configuration loading for buildfarm.
//!
//! User config location: $XDG_CONFIG_HOME/buildfarm/buildfarm.toml
//! Fallback: the platform config directory (`~/.config` on Linux).

use std::path::{Path, PathBuf};

use log::debug;

use super::settings::ServiceSettings;
use super::{ConfigError, ConfigResult};

const LOG_TARGET: &str = "buildfarm::config";

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/buildfarm/buildfarm.toml
/// 2. Otherwise: `dirs::config_dir()`/buildfarm/buildfarm.toml
///
/// Returns None if neither location can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)?;
    Some(base.join("buildfarm").join("buildfarm.toml"))
}

/// Load settings from `explicit`, or from the user config path if it exists.
///
/// An explicit path must exist. A missing user config yields the defaults.
pub fn load_settings(explicit: Option<&Path>) -> ConfigResult<ServiceSettings> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match user_config_path().filter(|path| path.is_file()) {
            Some(path) => path,
            None => {
                debug!(target: LOG_TARGET, "No user config found, using defaults");
                return Ok(ServiceSettings::default());
            }
        },
    };

    debug!(target: LOG_TARGET, "Loading config from {}", path.display());
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
}
