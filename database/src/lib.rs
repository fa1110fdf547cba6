//! Postgres storage backends for audit-relay
//!
//! Implements the storage ports defined by `audit-relay-delivery-health`
//! and `audit-relay-archival` on top of a shared sqlx connection pool.

pub mod archive_store;
pub mod client;
pub mod health_store;
pub mod migrations;

pub use archive_store::{PgArchiveStore, PgAuditLogStore, PgRetentionPolicyStore};
pub use client::DatabaseClient;
pub use health_store::PgHealthStore;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseConfigError {
    #[error("no database URL configured: set POSTGRES_URL or DATABASE_URL")]
    MissingUrl,
}

/// Connection configuration, sourced from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Honors `POSTGRES_URL` first, then `DATABASE_URL`.
    pub fn from_env() -> Result<Self, DatabaseConfigError> {
        let url = std::env::var("POSTGRES_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| DatabaseConfigError::MissingUrl)?;
        Ok(Self {
            url,
            max_connections: 10,
        })
    }

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
        }
    }
}
