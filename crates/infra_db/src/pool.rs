//! Connection pool and schema setup
//!
//! The jobs binary builds one pool per run from [`DatabaseConfig`]; the
//! billing schema ships inside the binary and is applied by the `migrate`
//! subcommand.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::DatabaseError;

pub type DatabasePool = PgPool;

/// Connections are recycled after this long even when healthy
const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(30 * 60);
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Where the billing database lives and how many connections a job may hold
///
/// ```rust
/// use infra_db::DatabaseConfig;
/// use std::time::Duration;
///
/// let config = DatabaseConfig::new("postgres://localhost/ride_billing")
///     .pool_size(1, 4)
///     .acquire_timeout(Duration::from_secs(5));
/// assert_eq!(config.max_connections, 4);
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    /// Wait for a free connection before failing with `PoolExhausted`
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("postgres://localhost/ride_billing")
    }
}

/// Opens the pool, failing fast when the database is unreachable
pub async fn create_pool(config: DatabaseConfig) -> Result<DatabasePool, DatabaseError> {
    debug!(
        min = config.min_connections,
        max = config.max_connections,
        "connecting to billing database"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(MAX_CONNECTION_LIFETIME)
        .idle_timeout(IDLE_CONNECTION_TIMEOUT)
        .connect(&config.url)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    info!(max_connections = config.max_connections, "billing database connected");
    Ok(pool)
}

/// Brings the schema up to date; already applied migrations are skipped
pub async fn run_migrations(pool: &DatabasePool) -> Result<(), DatabaseError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("billing schema migrations applied");
    Ok(())
}
