//! Database client with connection pooling

use crate::{migrations, DatabaseConfig};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};

/// Shared connection pool handed to every Postgres-backed port
#[derive(Debug, Clone)]
pub struct DatabaseClient {
    pool: PgPool,
    config: DatabaseConfig,
}

impl DatabaseClient {
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .context("Failed to create database connection pool")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Failed to test database connection")?;

        info!("connected to database");
        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Apply the embedded schema.
    pub async fn migrate(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Ping-based liveness check.
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
