//! Configuration management

use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/ifr";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default interval between watcher cycles.
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

/// Default interval between pipeline trigger checks.
pub const DEFAULT_TRIGGER_INTERVAL_SECS: u64 = 300;

/// Default object key prefix to watch.
pub const DEFAULT_WATCH_PREFIX: &str = "";

/// Default warehouse table for decoded rows.
pub const DEFAULT_TARGET_TABLE: &str = "ifr";

/// Worksheet the decoder reads.
pub const DEFAULT_SHEET_NAME: &str = "IFR";

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Pipeline-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Object key prefix restricting the watched listing
    pub watch_prefix: String,
    /// Warehouse table decoded rows are appended to
    pub target_table: String,
    /// Worksheet name inside each workbook
    pub sheet_name: String,
    /// Seconds between watcher cycles in `serve` mode
    pub watch_interval_secs: u64,
    /// Seconds between conditional pipeline triggers in `serve` mode
    pub trigger_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parse(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            pipeline: PipelineConfig {
                watch_prefix: std::env::var("IFR_WATCH_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_WATCH_PREFIX.to_string()),
                target_table: std::env::var("IFR_TARGET_TABLE")
                    .unwrap_or_else(|_| DEFAULT_TARGET_TABLE.to_string()),
                sheet_name: std::env::var("IFR_SHEET_NAME")
                    .unwrap_or_else(|_| DEFAULT_SHEET_NAME.to_string()),
                watch_interval_secs: env_parse("IFR_WATCH_INTERVAL", DEFAULT_WATCH_INTERVAL_SECS),
                trigger_interval_secs: env_parse(
                    "IFR_TRIGGER_INTERVAL",
                    DEFAULT_TRIGGER_INTERVAL_SECS,
                ),
            },
        };

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
