//! PostgreSQL adapters for `OrderCore`.
//!
//! One [`PostgresStore`] implements every storage port. Each correctness
//! guarantee rests on a single SQL statement or a single transaction:
//!
//! - ledgers use `INSERT ... ON CONFLICT DO NOTHING` and read the row
//!   count;
//! - stock decrements use `UPDATE ... WHERE quantity >= $2`, backed by a
//!   `CHECK (quantity >= 0)` constraint;
//! - order writes compare-and-set the version and append outbox rows in
//!   the same transaction.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ledger;
mod orders;
pub mod retry;
mod stock;

use std::num::NonZeroU32;
use std::time::Duration;

use nutype::nutype;
use ordercore::{RetryConfig, StoreResult};
use sqlx::{postgres::PgPoolOptions, query, Pool, Postgres};
use thiserror::Error;
use tracing::{info, instrument};

pub use error::{is_transient_sqlstate, map_sqlx_error};

/// Failures while setting up the store.
#[derive(Debug, Error)]
pub enum PostgresStoreError {
    /// The pool could not connect.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    /// The schema migrations did not apply.
    #[error("postgres migration failed")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Maximum number of database connections in the pool.
///
/// ```
/// use ordercore_postgres::MaxConnections;
/// use std::num::NonZeroU32;
///
/// let pool_size = MaxConnections::new(NonZeroU32::new(20).expect("20 is non-zero"));
/// assert_eq!(u32::from(NonZeroU32::from(pool_size)), 20);
/// ```
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(NonZeroU32);

/// Connection pool and retry settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for pooled connections (default: 10 minutes)
    pub idle_timeout: Duration,
    /// Backoff for retried reads
    pub retry: RetryConfig,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: NonZeroU32 = match NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            retry: RetryConfig::default(),
        }
    }
}

/// All `OrderCore` storage ports over one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
    retry: RetryConfig,
}

impl PostgresStore {
    /// Connects with the default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connects with a custom configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresStoreError> {
        let connection_string = connection_string.into();
        let max_connections: NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresStoreError::ConnectionFailed)?;
        info!(
            max_connections = %config.max_connections,
            "[postgres.connect] connection pool ready"
        );
        Ok(Self {
            pool,
            retry: config.retry,
        })
    }

    /// Wraps an existing pool, e.g. one shared with other components.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            retry: RetryConfig::default(),
        }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Checks that the database answers.
    pub async fn ping(&self) -> StoreResult<()> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, "ping"))?;
        Ok(())
    }

    /// Applies the bundled schema migrations.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), PostgresStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresStoreError::MigrationFailed)?;
        info!("[postgres.migrate] schema up to date");
        Ok(())
    }
}

/// Converts a stored `BIGINT` version.
fn version_from_db(version: i64, operation: &'static str) -> StoreResult<u64> {
    u64::try_from(version).map_err(|_| error::corrupt(operation, format!("negative version {version}")))
}

/// Converts a version for storage.
fn version_to_db(version: u64, operation: &'static str) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| error::corrupt(operation, format!("version {version} too large")))
}
