pub mod ask;
pub mod config_cmd;
pub mod doctor;
pub mod knowledge;
pub mod serve;

use kiln_config::AppConfig;
use std::path::{Path, PathBuf};

/// The config file in use: `--config` when given, else `~/.kiln/config.toml`.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load the config file, apply environment overrides, and validate.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let Some(path) = explicit else {
        return Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?);
    };
    let mut config =
        AppConfig::load_from(path).map_err(|e| format!("Failed to load config: {e}"))?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// The client's working directory, sent so the server can resolve
/// relative paths.
pub fn working_dir() -> Option<String> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.display().to_string())
}
