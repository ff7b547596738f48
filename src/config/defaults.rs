//! Default configuration values for buildfarm.
//!
//! `config init` renders these into a TOML template.

use super::settings::ServiceSettings;

/// Returns the default ServiceSettings for configuration generation.
pub fn default_settings() -> ServiceSettings {
    ServiceSettings::default()
}

/// Render the default settings as a commented TOML document.
pub fn default_settings_toml() -> Result<String, toml::ser::Error> {
    let body = toml::to_string_pretty(&default_settings())?;
    Ok(format!(
        "# buildfarm configuration\n\
         # Durations under [timeouts] are in milliseconds.\n\
         # [compiler].command runs once per flavor with BUILDFARM_PACKAGE and\n\
         # BUILDFARM_MINIFY set; its stdout is the compiled script.\n\n{body}"
    ))
}
