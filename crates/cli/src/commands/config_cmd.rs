//! `kiln config`: show configuration.

use kiln_config::AppConfig;
use std::path::Path;

pub fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config.to_toml()?);
    Ok(())
}

pub fn show_default() {
    println!("{}", AppConfig::default_toml());
}

pub fn path(explicit: Option<&Path>) {
    println!("{}", super::config_file(explicit).display());
}
