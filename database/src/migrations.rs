//! Embedded schema for the audit-relay tables

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS destinations (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        disabled BOOLEAN NOT NULL DEFAULT FALSE,
        disabled_reason TEXT,
        updated_by TEXT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS destination_health (
        destination_id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'healthy',
        consecutive_failures INT NOT NULL DEFAULT 0,
        consecutive_successes INT NOT NULL DEFAULT 0,
        total_deliveries BIGINT NOT NULL DEFAULT 0,
        total_failures BIGINT NOT NULL DEFAULT 0,
        last_success_at TIMESTAMPTZ,
        last_failure_at TIMESTAMPTZ,
        last_error TEXT,
        circuit_breaker_state TEXT NOT NULL DEFAULT 'closed',
        circuit_breaker_opened_at TIMESTAMPTZ,
        disabled_at TIMESTAMPTZ,
        disabled_reason TEXT,
        average_response_time_ms DOUBLE PRECISION NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id UUID PRIMARY KEY,
        ts TIMESTAMPTZ NOT NULL,
        principal_id TEXT NOT NULL,
        organization_id TEXT NOT NULL,
        action TEXT NOT NULL,
        data_classification TEXT NOT NULL,
        retention_policy TEXT NOT NULL,
        archived_at TIMESTAMPTZ,
        extras JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS audit_log_retention_idx
        ON audit_log (retention_policy, data_classification, ts)
        WHERE archived_at IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_archives (
        id TEXT PRIMARY KEY,
        retention_policy TEXT NOT NULL,
        data_classification TEXT NOT NULL,
        range_start TIMESTAMPTZ,
        range_end TIMESTAMPTZ,
        metadata JSONB NOT NULL,
        data BYTEA NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        retrieved_count BIGINT NOT NULL DEFAULT 0,
        last_retrieved_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS retention_policies (
        policy_name TEXT PRIMARY KEY,
        data_classification TEXT NOT NULL,
        archive_after_days BIGINT NOT NULL,
        delete_after_days BIGINT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
];

/// Apply every schema statement in order.
pub async fn run(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to execute schema statement")?;
    }
    info!("schema migration completed");
    Ok(())
}
