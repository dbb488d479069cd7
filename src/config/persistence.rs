// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration persistence (save/load).

use crate::config::ClientConfig;
use crate::pipeline::DisabledFilterOverlay;
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Manages configuration file persistence.
pub struct ConfigManager {
    config_dir: PathBuf,
    state_dir: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager, initializing directories.
    pub fn new() -> Result<Self, ConfigError> {
        let project_dirs =
            ProjectDirs::from("", "", "dspremote").ok_or(ConfigError::NoConfigDir)?;

        let config_dir = project_dirs.config_dir().to_path_buf();

        // Editor state lives apart from user-edited settings when the platform allows
        let state_dir = project_dirs
            .state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| config_dir.join("state"));

        Self::with_dirs(config_dir, state_dir)
    }

    /// Use explicit directories instead of the platform ones.
    pub fn with_dirs(config_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config_dir = config_dir.into();
        let state_dir = state_dir.into();

        fs::create_dir_all(&config_dir)?;
        fs::create_dir_all(&state_dir)?;

        Ok(Self { config_dir, state_dir })
    }

    /// Get the path to the main config file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Load the client config.
    pub fn load_config(&self) -> Result<ClientConfig, ConfigError> {
        let path = self.config_path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            Ok(ClientConfig::from_toml(&content)?)
        } else {
            Ok(ClientConfig::default())
        }
    }

    /// Save the client config.
    pub fn save_config(&self, config: &ClientConfig) -> Result<(), ConfigError> {
        let content = config.to_toml()?;
        fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Path of the disabled-filter overlay document.
    pub fn overlay_path(&self) -> PathBuf {
        self.state_dir.join("disabled_filters.json")
    }

    /// Overlay for a new editing session, file-backed when `config` asks for it.
    pub fn open_overlay(&self, config: &ClientConfig) -> DisabledFilterOverlay {
        if config.editor.persist_disabled_filters {
            DisabledFilterOverlay::with_store(self.overlay_path())
        } else {
            DisabledFilterOverlay::new()
        }
    }
}
