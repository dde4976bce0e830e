//! Database module
//!
//! This module handles database connections and operations.

use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, instrument, warn};

use crate::config::DatabaseConfig;

pub mod bootstrap;
pub mod events;
pub mod queries;

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

impl Database {
    /// Connect, retrying `connect_retries` times with a fixed delay.
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let attempts = config.connect_retries.max(1);
        let mut attempt = 1;
        loop {
            match Self::options(config).connect(&config.url).await {
                Ok(pool) => {
                    info!(attempt, "database pool ready");
                    return Ok(Self { pool });
                }
                Err(err) if attempt < attempts => {
                    warn!(attempt, error = %err, "database connection failed, retrying");
                    tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// A pool that opens connections on first use.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = Self::options(config).connect_lazy(&config.url)?;
        Ok(Self { pool })
    }

    fn options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction; dropping it without `commit` rolls back.
    pub async fn transaction(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Check out a dedicated connection from the pool.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        self.pool.acquire().await
    }

    /// Round-trip a trivial query and report the latency.
    pub async fn ping(&self) -> Result<Duration, sqlx::Error> {
        let started = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await?;
        Ok(started.elapsed())
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_connections: self.pool.options().get_max_connections(),
        }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}
