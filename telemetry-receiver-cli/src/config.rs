//! Configuration loading

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use telemetry_receiver::ReceiverConfig;

/// Load receiver configuration from a TOML file
///
/// Every section and field is optional; missing values take the built-in
/// defaults of the stock deployment.
pub fn load_config(path: &Path) -> Result<ReceiverConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: ReceiverConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}
