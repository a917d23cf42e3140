//! Config file locations and TOML (de)serialization.

use std::fs;
use std::path::{Path, PathBuf};

use super::ControllerConfig;
use crate::error::ConfigError;

const APP_DIR: &str = "pinned-panel";

/// Get the global config directory: ~/.config/pinned-panel
pub fn get_global_config_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine config directory".to_string())
    })?;
    Ok(base.join(APP_DIR))
}

/// Path of the controller tuning file.
pub fn get_controller_config_path() -> Result<PathBuf, ConfigError> {
    Ok(get_global_config_dir()?.join("controller.toml"))
}

/// Path of the key/value preference storage.
pub fn get_preference_storage_path() -> Result<PathBuf, ConfigError> {
    Ok(get_global_config_dir()?.join("storage.json"))
}

/// Load and validate a controller config from a TOML file.
pub fn load_config_from_file(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string())
        } else {
            ConfigError::IoError(e)
        }
    })?;
    let config: ControllerConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load the config at `path`, or defaults if the file does not exist.
///
/// A file that exists but does not parse or validate is an error: silently
/// replacing a user's catalog would make the controller query the wrong nodes.
pub fn load_or_default(path: &Path) -> Result<ControllerConfig, ConfigError> {
    match load_config_from_file(path) {
        Ok(config) => {
            log::info!(target: "pinned_panel::config", "Loaded controller config from {}", path.display());
            Ok(config)
        }
        Err(ConfigError::FileNotFound(_)) => {
            log::info!(target: "pinned_panel::config", "No controller config at {}, using defaults", path.display());
            Ok(ControllerConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Write a controller config as TOML, creating parent directories.
pub fn save_config_to_file(config: &ControllerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ValidationFailed(format!("Cannot serialize config: {}", e)))?;
    fs::write(path, content)?;
    Ok(())
}
