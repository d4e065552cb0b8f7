//! Configuration system.
//!
//! Layered configuration with environment variable overrides: built-in
//! defaults, then the user-level file under the platform config directory,
//! then an explicit file named by `MUSTER_CONFIG`, then `MUSTER_*`
//! environment variables. Validated before use.

use crate::logging::LoggingConfig;
use crate::session::SessionSettings;
use crate::types::Domain;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MusterConfig {
    /// Directory session parameters
    #[serde(default)]
    pub session: SessionConfig,

    /// Batch operation policy
    #[serde(default)]
    pub batch: BatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Directory session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Domain to resolve the node in: local, default, directory_service,
    /// proxy_directory_server
    #[serde(default = "default_domain")]
    pub domain: Domain,

    /// Server address, required for the two remote domains
    #[serde(default)]
    pub server: Option<String>,

    /// Administrator name to authenticate with at startup
    #[serde(default)]
    pub admin_name: Option<String>,

    /// Administrator password paired with `admin_name`
    #[serde(default)]
    pub admin_password: Option<String>,
}

fn default_domain() -> Domain {
    Domain::Local
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            server: None,
            admin_name: None,
            admin_password: None,
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.domain.is_proxy() && self.server.as_deref().map_or(true, str::is_empty) {
            return Err(format!("{} requires a server address", self.domain));
        }
        if self.admin_password.is_some() && self.admin_name.as_deref().map_or(true, str::is_empty)
        {
            return Err("admin_password is set without an admin_name".to_string());
        }
        Ok(())
    }

    /// Connection parameters for opening a session.
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            domain: self.domain,
            server: self.server.clone(),
        }
    }
}

/// Batch operation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Keep going after a per-item failure; fatal errors always stop the
    /// batch regardless of this setting
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            continue_on_error: default_true(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Session(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Session(msg) => write!(f, "Session: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors raised while loading configuration or applying it to a subsystem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration load failed: {0}")]
    Load(String),

    #[error("configuration validation failed:\n{0}")]
    Invalid(String),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
const LOG_FORMATS: [&str; 2] = ["text", "json"];
const LOG_OUTPUTS: [&str; 4] = ["stdout", "stderr", "file", "both"];

impl MusterConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.session.validate() {
            errors.push(ValidationError::Session(e));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "unknown level '{}' (expected one of {})",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "unknown format '{}' (expected 'text' or 'json')",
                self.logging.format
            )));
        }
        if !LOG_OUTPUTS.contains(&self.logging.output.as_str()) {
            errors.push(ValidationError::Logging(format!(
                "unknown output '{}' (expected 'stdout', 'stderr', 'file', or 'both')",
                self.logging.output
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads configuration from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Path to the user-level config file, honoring `XDG_CONFIG_HOME`.
    pub fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "muster")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from all sources in override order: defaults, the
    /// user-level file, the file named by `MUSTER_CONFIG`, then `MUSTER_*`
    /// environment variables.
    pub fn load() -> Result<MusterConfig, ConfigError> {
        let mut builder = builder_with_defaults().map_err(load_error)?;

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            } else {
                warn!(
                    config_path = %global_path.display(),
                    "User configuration file not found. Consider creating it for \
                     user-level defaults."
                );
            }
        }

        if let Ok(explicit) = std::env::var("MUSTER_CONFIG") {
            builder = builder.add_source(File::from(PathBuf::from(explicit)).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("MUSTER")
                .separator("__")
                .try_parsing(true),
        );

        Self::finish(builder)
    }

    /// Load configuration from a specific file over the defaults, skipping
    /// the user-level and environment layers.
    pub fn load_from_file(path: &Path) -> Result<MusterConfig, ConfigError> {
        let builder = builder_with_defaults()
            .map_err(load_error)?
            .add_source(File::from(path.to_path_buf()).required(true));
        Self::finish(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<MusterConfig, ConfigError> {
        let config: MusterConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(load_error)?;

        config.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ConfigError::Invalid(msgs.join("\n"))
        })?;

        Ok(config)
    }
}

fn load_error(err: config::ConfigError) -> ConfigError {
    ConfigError::Load(err.to_string())
}

/// Create a Config builder with the defaults every layer merges over.
fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
    Config::builder()
        .set_default("session.domain", "local")?
        .set_default("batch.continue_on_error", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")
}
