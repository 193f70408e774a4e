//! TOML file backing for [`ImageKitConfig`].
//!
//! A store points at exactly one file. Loading a missing file seeds it with
//! defaults; a file that fails to parse is left alone and defaults are used.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::app_config::ImageKitConfig;
use crate::domain::errors::ConfigError;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Reads and writes one configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store for `config.toml` in the platform config directory.
    ///
    /// # Errors
    /// Returns `ConfigError` if the platform has no config directory.
    pub fn new() -> Result<Self, ConfigError> {
        let dir = ImageKitConfig::default_config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
        Ok(Self::at(dir.join(CONFIG_FILE_NAME)))
    }

    /// Store for an explicit file path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the configuration, seeding the file with defaults if it is missing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or the seed written.
    pub fn load(&self) -> Result<ImageKitConfig, ConfigError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No config file, writing defaults");
            let config = ImageKitConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let content = fs::read_to_string(&self.path)?;
        match toml::from_str::<ImageKitConfig>(&content) {
            Ok(config) => {
                debug!(path = %self.path.display(), "Loaded config");
                Ok(config)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed config, using defaults");
                Ok(ImageKitConfig::default())
            }
        }
    }

    /// Replaces the file atomically with `config`.
    ///
    /// # Errors
    /// Returns `ConfigError` if serialization or the write fails.
    pub fn save(&self, config: &ImageKitConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        let parent = self
            .path
            .parent()
            .ok_or_else(|| std::io::Error::other("config path has no parent directory"))?;
        fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(content.as_bytes())?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
