//! Configuration file loader.

use std::path::{Path, PathBuf};

use super::RelayConfig;

/// Environment variable that overrides `server.port`.
pub const PORT_ENV: &str = "PORT";

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from(".claude-relay.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("claude-relay").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load the first available file, or defaults, then apply the `PORT`
    /// override and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed, if `PORT`
    /// is not a valid port, or if validation fails.
    pub fn load(&self) -> Result<RelayConfig, ConfigError> {
        let mut config = self.load_file()?;
        apply_port_override(&mut config, std::env::var(PORT_ENV).ok().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    fn load_file(&self) -> Result<RelayConfig, ConfigError> {
        match self.find_config_file() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::load_from_path(&path)
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(RelayConfig::default())
            }
        }
    }

    /// Load configuration from a specific path without overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_path(path: &Path) -> Result<RelayConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a `PORT` value on top of the loaded config.
///
/// # Errors
///
/// Returns `ConfigError::InvalidPort` if the value is not a `u16`.
pub fn apply_port_override(config: &mut RelayConfig, port: Option<&str>) -> Result<(), ConfigError> {
    let Some(raw) = port.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(());
    };

    config.server.port = raw
        .parse()
        .map_err(|_| ConfigError::InvalidPort(raw.to_string()))?;
    tracing::debug!(port = config.server.port, "Port overridden from environment");
    Ok(())
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
