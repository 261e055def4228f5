//! TOML file configuration structures.
//!
//! These structs directly map to the `trackbell.toml` file format. Every
//! section is optional and falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub carriers: CarriersConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Database configuration section. `DATABASE_URL` takes precedence over `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://trackbell.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

/// Polling schedule, shared by every tracked parcel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30 * 60
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarriersConfig {
    #[serde(default)]
    pub oca: OcaConfig,
}

/// OCA tracking endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcaConfig {
    #[serde(default = "default_oca_endpoint")]
    pub endpoint: String,
    /// Whole-hour offset the carrier's local times are shown in.
    #[serde(default = "default_oca_utc_offset_hours")]
    pub utc_offset_hours: i8,
}

impl Default for OcaConfig {
    fn default() -> Self {
        Self {
            endpoint: default_oca_endpoint(),
            utc_offset_hours: default_oca_utc_offset_hours(),
        }
    }
}

fn default_oca_endpoint() -> String {
    trackbell_core::carriers::OcaGateway::DEFAULT_ENDPOINT.to_string()
}

fn default_oca_utc_offset_hours() -> i8 {
    -3
}

/// Telegram Bot API. The token comes from `TELEGRAM_BOT_TOKEN`, never from the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
