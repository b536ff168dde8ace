//! Gate configuration file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::saml::config::PLACEHOLDER_MARKER;
use crate::saml::SamlConfig;
use crate::session::SessionKeyConfig;

/// Default upper bound on assertion validation, in milliseconds.
pub const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 5000;

fn default_validation_timeout_ms() -> u64 {
    DEFAULT_VALIDATION_TIMEOUT_MS
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the gate needs, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    pub saml: SamlConfig,

    pub session: SessionKeyConfig,

    /// Assertions still being validated after this long are rejected.
    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,
}

impl GateConfig {
    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.saml.validate().map_err(ConfigError::Invalid)?;

        if self.session.private_key.contains(PLACEHOLDER_MARKER) {
            return Err(ConfigError::Invalid(
                "session private_key still holds a placeholder value".to_string(),
            ));
        }
        if self.session.init_vector.contains(PLACEHOLDER_MARKER) {
            return Err(ConfigError::Invalid(
                "session init_vector still holds a placeholder value".to_string(),
            ));
        }
        self.session.validate().map_err(ConfigError::Invalid)?;

        if self.validation_timeout_ms == 0 {
            return Err(ConfigError::Invalid("validation_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }
}
