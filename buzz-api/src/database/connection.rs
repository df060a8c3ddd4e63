//! Database connection management with SQLx
//!
//! Provides the PostgreSQL connection pool used by the repository layer.
//! Only Postgres is supported: the ledger relies on `SELECT ... FOR UPDATE`
//! row locking inside multi-statement transactions.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use buzz_core::error::{Error, Result};

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct DatabasePool {
    pool: Pool<Postgres>,
}

impl DatabasePool {
    /// Create a connection pool and run pending migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(
            "Creating PostgreSQL connection pool with {} max connections",
            config.max_connections
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.database_url)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create PostgreSQL pool: {}", e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to run migrations: {}", e)))?;

        info!("PostgreSQL connection pool created successfully");
        Ok(Self { pool })
    }

    /// Borrow the underlying pool
    pub fn inner(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("PostgreSQL health check failed: {}", e)))?;
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Read configuration from environment variables
    ///
    /// Returns `None` when `DATABASE_URL` is unset, in which case the
    /// service runs on in-memory repositories.
    pub fn from_env() -> Option<Self> {
        let database_url = std::env::var("DATABASE_URL").ok()?;

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        Some(Self {
            database_url,
            max_connections,
        })
    }
}
