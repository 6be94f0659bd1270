//! Layered configuration: embedded defaults, optional local file, environment.

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::kernel::KernelConfig;

/// Prefix for environment overrides, e.g. `OPK__KERNEL__SCHEDULER_POLICY=priority`.
pub const ENV_PREFIX: &str = "OPK";

/// Local override file, looked up in the working directory.
pub const LOCAL_CONFIG: &str = "operator_kernel";

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size_mb: usize,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_request_size_mb: 2,
            enable_cors: false,
            cors_origins: vec!["http://localhost:3000".to_string()],
            rate_limit_per_minute: 600,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main settings structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub kernel: KernelConfig,
}

impl Settings {
    /// Load defaults, then `operator_kernel.toml` if present, then `OPK__*`.
    pub fn load() -> Result<Self> {
        Self::from_builder(
            Config::builder().add_source(File::with_name(LOCAL_CONFIG).required(false)),
        )
    }

    /// Load defaults, then the given file (which must exist), then `OPK__*`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let path = path
            .to_str()
            .ok_or_else(|| anyhow!("Config path is not valid UTF-8: {:?}", path))?;
        Self::from_builder(Config::builder().add_source(File::with_name(path).required(true)))
    }

    fn from_builder(
        overrides: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(include_str!("../config.toml"), FileFormat::Toml))
            .add_source(overrides.build().context("Failed to read configuration file")?)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Invalid configuration values")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the server or kernel could not start with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }
        if self.server.max_request_size_mb == 0 {
            return Err(anyhow!("Max request size cannot be 0"));
        }
        if self.server.rate_limit_per_minute == 0 {
            return Err(anyhow!("Rate limit cannot be 0"));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(anyhow!(
                "Unknown log format '{}', expected 'text' or 'json'",
                self.logging.format
            ));
        }

        self.kernel.validate()?;
        Ok(())
    }

    /// Get a configuration value by JSON pointer (e.g., "/server/port")
    pub fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = serde_json::to_value(self)?;
        let value = value
            .pointer(path)
            .ok_or_else(|| anyhow!("Configuration path not found: {}", path))?;

        Ok(serde_json::from_value(value.clone())?)
    }
}
