//! Configuration loader with XDG-compliant path resolution
//!
//! Loads configuration from multiple locations with layered priority:
//! 1. `/etc/proclaunch/config.toml` (lowest priority)
//! 2. `~/.config/proclaunch/config.toml`
//! 3. `~/.proclaunch.toml`
//! 4. `./.proclaunch.toml` (highest priority)

use std::path::PathBuf;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use super::interpolate::interpolate_config;
use super::model::Config;

/// Application name used for XDG directories
const APP_NAME: &str = "proclaunch";

/// Get XDG config search paths in priority order (lowest to highest)
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from(format!("/etc/{}/config.toml", APP_NAME)));

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(APP_NAME).join("config.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(format!(".{}.toml", APP_NAME)));
    }

    paths.push(PathBuf::from(format!(".{}.toml", APP_NAME)));

    paths
}

/// Load configuration with XDG layering
///
/// Configurations are merged in priority order, with later files
/// overriding earlier ones. Environment variables with prefix
/// `PROCLAUNCH_` override all file-based configuration. String values
/// are interpolated after merging.
///
/// Runs `$(command)` interpolation through the blocking runner, which
/// blocks the calling thread even when called from async code.
pub fn load_config(override_path: Option<&str>) -> Result<Config> {
    let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

    for path in config_paths() {
        if path.exists() {
            tracing::debug!("Loading config from: {}", path.display());
            figment = figment.merge(Toml::file(&path));
        }
    }

    if let Some(path) = override_path {
        let path = PathBuf::from(path);
        if path.exists() {
            tracing::debug!("Loading override config from: {}", path.display());
            figment = figment.merge(Toml::file(&path));
        } else {
            tracing::warn!("Override config not found: {}", path.display());
        }
    }

    // PROCLAUNCH_DEFAULTS__TIMEOUT_MS=600 maps to defaults.timeout_ms = 600
    figment = figment.merge(Env::prefixed("PROCLAUNCH_").split("__"));

    let mut config: Config = figment.extract().context("Failed to load configuration")?;
    interpolate_config(&mut config);
    Ok(config)
}

/// Find all existing config files (for debugging/introspection)
pub fn find_config_files() -> Vec<PathBuf> {
    config_paths().into_iter().filter(|p| p.exists()).collect()
}

/// Get the default config directory for writing new configs
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the default config file path
pub fn default_config_file() -> Option<PathBuf> {
    default_config_dir().map(|d| d.join("config.toml"))
}
