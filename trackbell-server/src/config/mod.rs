//! Configuration module for trackbell-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::FileConfig;
use crate::config::runtime::{DatabaseConfig, ServerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use time::UtcOffset;
use trackbell_core::config::{OcaConfig, SchedulerConfig, TelegramConfig};
use url::Url;

/// Environment variable holding the Telegram bot token.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
/// Environment variable overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("{BOT_TOKEN_ENV} environment variable not set")]
    MissingBotToken,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub oca: OcaConfig,
    pub telegram: TelegramConfig,
}

/// Values taken from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub database_url: Option<String>,
    pub bot_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var(DATABASE_URL_ENV).ok(),
            bot_token: std::env::var(BOT_TOKEN_ENV).ok(),
        }
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI and environment overrides
    /// 3. Validate and convert into runtime types
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let file_config: FileConfig = toml::from_str(&config_content)?;
        self.build(file_config, EnvOverrides::from_env())
    }

    fn build(
        &self,
        mut file_config: FileConfig,
        env: EnvOverrides,
    ) -> Result<LoadedConfig, ConfigError> {
        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        if let Some(url) = env.database_url.filter(|url| !url.trim().is_empty()) {
            file_config.database.url = url;
        }
        let bot_token = env
            .bot_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(ConfigError::MissingBotToken)?;

        validate(&file_config)?;
        build_loaded_config(file_config, bot_token)
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.scheduler.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.interval_secs must be greater than zero".to_string(),
        ));
    }
    if config.scheduler.fetch_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.fetch_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if config.database.max_connections == 0 {
        return Err(ConfigError::ValidationError(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn build_loaded_config(
    file_config: FileConfig,
    bot_token: String,
) -> Result<LoadedConfig, ConfigError> {
    let oca = &file_config.carriers.oca;
    let utc_offset = UtcOffset::from_hms(oca.utc_offset_hours, 0, 0).map_err(|e| {
        ConfigError::ValidationError(format!("carriers.oca.utc_offset_hours: {e}"))
    })?;

    Ok(LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
        },
        database: DatabaseConfig {
            url: file_config.database.url,
            max_connections: file_config.database.max_connections,
        },
        scheduler: SchedulerConfig {
            interval: Duration::from_secs(file_config.scheduler.interval_secs),
            fetch_timeout: Duration::from_secs(file_config.scheduler.fetch_timeout_secs),
        },
        oca: OcaConfig {
            endpoint: parse_url("carriers.oca.endpoint", &oca.endpoint)?,
            utc_offset,
        },
        telegram: TelegramConfig {
            api_base: parse_url("telegram.api_base", &file_config.telegram.api_base)?,
            bot_token,
        },
    })
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::ValidationError(format!("{field}: {e}")))
}
