use std::time::Duration;

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolOptions;
use sqlx::postgres::{PgPool, PgPoolOptions};

use quill_core::config::{redact, DatabaseConfig};
use quill_core::error::{QuillError, Result};
use quill_core::Dialect;

/// Connection pool for whichever dialect the configuration selects.
#[derive(Clone, Debug)]
pub enum Database {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl Database {
    /// Create a new database connection from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let dialect = config.dialect()?;
        let url = config.connection_url()?;

        tracing::debug!(%dialect, url = %redact(&url), "Connecting to database");

        let db = match dialect {
            Dialect::Postgres => Self::Postgres(
                pool_options::<sqlx::Postgres>(config, PgPoolOptions::new())
                    .connect(&url)
                    .await
                    .map_err(|e| connection_error(&url, e))?,
            ),
            Dialect::MySql => Self::MySql(
                pool_options::<sqlx::MySql>(config, MySqlPoolOptions::new())
                    .connect(&url)
                    .await
                    .map_err(|e| connection_error(&url, e))?,
            ),
        };

        Ok(db)
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Postgres(_) => Dialect::Postgres,
            Self::MySql(_) => Dialect::MySql,
        }
    }
}

fn pool_options<DB: sqlx::Database>(
    config: &DatabaseConfig,
    options: PoolOptions<DB>,
) -> PoolOptions<DB> {
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
}

fn connection_error(url: &str, e: sqlx::Error) -> QuillError {
    QuillError::Connection(format!("Failed to connect to {}: {}", redact(url), e))
}
