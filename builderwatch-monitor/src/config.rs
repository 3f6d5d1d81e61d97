use anyhow::{Context, Result};
use builderwatch_connector::config::ConnectorConfig;
use builderwatch_logger::LogConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "BUILDERWATCH_CONFIG";
/// Used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "builderwatch.toml";
/// Prefix of environment overrides, e.g. `BUILDERWATCH__LOG__LEVEL=debug`.
const ENV_PREFIX: &str = "BUILDERWATCH";

/// The top-level configuration for the monitor binary.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct MonitorConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// The configuration file path, taken from the environment if set.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Loads the monitor configuration.
///
/// The TOML file at `path` is optional; a missing file yields the defaults.
/// `BUILDERWATCH__*` environment variables override values from the file.
pub fn load_config(path: &str) -> Result<MonitorConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

    let settings: MonitorConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", path))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
