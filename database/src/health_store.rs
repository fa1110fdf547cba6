//! Postgres-backed destination health store and directory

use anyhow::{Context, Result};
use async_trait::async_trait;
use audit_relay_delivery_health::{
    CircuitState, DestinationDirectory, DestinationHealth, DestinationStatus, HealthStore,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::info;

/// Implements both the health persistence port and the destination
/// directory on the shared pool. Each upsert is a single statement, so it
/// is atomic per destination row.
#[derive(Debug, Clone)]
pub struct PgHealthStore {
    pool: PgPool,
}

impl PgHealthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_from_str(s: &str) -> Result<DestinationStatus> {
    match s {
        "healthy" => Ok(DestinationStatus::Healthy),
        "degraded" => Ok(DestinationStatus::Degraded),
        "unhealthy" => Ok(DestinationStatus::Unhealthy),
        "disabled" => Ok(DestinationStatus::Disabled),
        other => anyhow::bail!("unknown destination status in storage: {other}"),
    }
}

fn circuit_from_str(s: &str) -> Result<CircuitState> {
    match s {
        "closed" => Ok(CircuitState::Closed),
        "open" => Ok(CircuitState::Open),
        "half-open" => Ok(CircuitState::HalfOpen),
        other => anyhow::bail!("unknown circuit state in storage: {other}"),
    }
}

fn row_to_health(row: &sqlx::postgres::PgRow) -> Result<DestinationHealth> {
    Ok(DestinationHealth {
        destination_id: row.try_get("destination_id")?,
        organization_id: row.try_get("organization_id")?,
        status: status_from_str(row.try_get::<String, _>("status")?.as_str())?,
        consecutive_failures: row.try_get::<i32, _>("consecutive_failures")? as u32,
        consecutive_successes: row.try_get::<i32, _>("consecutive_successes")? as u32,
        total_deliveries: row.try_get::<i64, _>("total_deliveries")? as u64,
        total_failures: row.try_get::<i64, _>("total_failures")? as u64,
        last_success_at: row.try_get::<Option<DateTime<Utc>>, _>("last_success_at")?,
        last_failure_at: row.try_get::<Option<DateTime<Utc>>, _>("last_failure_at")?,
        last_error: row.try_get("last_error")?,
        circuit_breaker_state: circuit_from_str(
            row.try_get::<String, _>("circuit_breaker_state")?.as_str(),
        )?,
        circuit_breaker_opened_at: row
            .try_get::<Option<DateTime<Utc>>, _>("circuit_breaker_opened_at")?,
        disabled_at: row.try_get::<Option<DateTime<Utc>>, _>("disabled_at")?,
        disabled_reason: row.try_get("disabled_reason")?,
        average_response_time_ms: row.try_get("average_response_time_ms")?,
    })
}

#[async_trait]
impl HealthStore for PgHealthStore {
    async fn find(&self, destination_id: &str) -> Result<Option<DestinationHealth>> {
        let row = sqlx::query("SELECT * FROM destination_health WHERE destination_id = $1")
            .bind(destination_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load destination health")?;
        row.as_ref().map(row_to_health).transpose()
    }

    async fn upsert(&self, health: &DestinationHealth) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO destination_health (
                destination_id, organization_id, status,
                consecutive_failures, consecutive_successes,
                total_deliveries, total_failures,
                last_success_at, last_failure_at, last_error,
                circuit_breaker_state, circuit_breaker_opened_at,
                disabled_at, disabled_reason, average_response_time_ms
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (destination_id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                status = EXCLUDED.status,
                consecutive_failures = EXCLUDED.consecutive_failures,
                consecutive_successes = EXCLUDED.consecutive_successes,
                total_deliveries = EXCLUDED.total_deliveries,
                total_failures = EXCLUDED.total_failures,
                last_success_at = EXCLUDED.last_success_at,
                last_failure_at = EXCLUDED.last_failure_at,
                last_error = EXCLUDED.last_error,
                circuit_breaker_state = EXCLUDED.circuit_breaker_state,
                circuit_breaker_opened_at = EXCLUDED.circuit_breaker_opened_at,
                disabled_at = EXCLUDED.disabled_at,
                disabled_reason = EXCLUDED.disabled_reason,
                average_response_time_ms = EXCLUDED.average_response_time_ms
            "#,
        )
        .bind(&health.destination_id)
        .bind(&health.organization_id)
        .bind(health.status.to_string())
        .bind(health.consecutive_failures as i32)
        .bind(health.consecutive_successes as i32)
        .bind(health.total_deliveries as i64)
        .bind(health.total_failures as i64)
        .bind(health.last_success_at)
        .bind(health.last_failure_at)
        .bind(&health.last_error)
        .bind(health.circuit_breaker_state.to_string())
        .bind(health.circuit_breaker_opened_at)
        .bind(health.disabled_at)
        .bind(&health.disabled_reason)
        .bind(health.average_response_time_ms)
        .execute(&self.pool)
        .await
        .context("Failed to upsert destination health")?;
        Ok(())
    }

    async fn list_unhealthy(&self) -> Result<Vec<DestinationHealth>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM destination_health
            WHERE status != 'disabled'
              AND (status != 'healthy' OR circuit_breaker_state != 'closed')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list unhealthy destinations")?;
        rows.iter().map(row_to_health).collect()
    }
}

#[async_trait]
impl DestinationDirectory for PgHealthStore {
    async fn set_disabled(
        &self,
        destination_id: &str,
        disabled: bool,
        reason: &str,
        actor: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE destinations
            SET disabled = $2, disabled_reason = $3, updated_by = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(destination_id)
        .bind(disabled)
        .bind(reason)
        .bind(actor)
        .execute(&self.pool)
        .await
        .context("Failed to flip destination disabled flag")?;

        info!(destination_id, disabled, actor, "destination disabled flag updated");
        Ok(())
    }
}
