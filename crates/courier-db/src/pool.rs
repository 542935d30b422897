//! Connection pool management for PostgreSQL.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::DbError;

/// Configuration options for the database connection pool.
#[derive(Debug, Clone)]
pub struct DbPoolOptions {
    /// Maximum number of open connections.
    pub max_connections: u32,

    /// Number of idle connections kept warm (mapped to the pool's
    /// minimum connection count).
    pub min_connections: u32,

    /// Maximum lifetime of a single connection.
    pub max_lifetime: Duration,

    /// Maximum time to wait when acquiring a connection.
    pub acquire_timeout: Duration,
}

impl Default for DbPoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 25,
            min_connections: 5,
            max_lifetime: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Connect to PostgreSQL with the given pool options.
///
/// # Errors
///
/// Returns `DbError::ConnectionFailed` if the connection cannot be
/// established.
pub async fn connect(database_url: &str, options: DbPoolOptions) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(options.max_connections)
        .min_connections(options.min_connections)
        .max_lifetime(options.max_lifetime)
        .acquire_timeout(options.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_options() {
        let options = DbPoolOptions::default();
        assert_eq!(options.max_connections, 25);
        assert_eq!(options.min_connections, 5);
        assert_eq!(options.max_lifetime, Duration::from_secs(3600));
    }
}
