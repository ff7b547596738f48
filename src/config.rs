//! Service configuration: TOML settings, defaults, and file discovery.

pub mod defaults;
pub mod settings;
pub mod user;

pub use defaults::{default_settings, default_settings_toml};
pub use settings::{
    CompilerSettings, HostSettings, QueueSettings, ServiceSettings, StorageSettings,
    TimeoutSettings,
};
pub use user::{load_settings, user_config_path};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

