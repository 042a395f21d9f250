//! Database access: ingestion state store, reference-data cache, bulk loader

use std::time::Duration;

use ifr_common::{IfrError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;

pub mod loader;
pub mod reference;
pub mod state;

pub use reference::ReferenceData;
pub use state::{FileState, FileStatus, StateStore, MAX_RETRIES};

/// Build the shared connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(db_err)
}

/// Database failures are transient from the pipeline's point of view: the
/// caller leaves the file where it is and retries next cycle.
pub(crate) fn db_err(e: sqlx::Error) -> IfrError {
    IfrError::Database(e.to_string())
}
