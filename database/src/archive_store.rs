//! Postgres-backed archive, audit-log, and retention-policy stores

use anyhow::{Context, Result};
use async_trait::async_trait;
use audit_relay_archival::{
    Archive, ArchiveMetadata, ArchiveQuery, ArchiveStore, AuditLogStore, RecordQuery,
    RetentionPolicyStore,
};
use audit_relay_contracts::{AuditRecord, DataClassification, RetentionPolicy};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgArchiveStore {
    pool: PgPool,
}

impl PgArchiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_archive(row: &sqlx::postgres::PgRow) -> Result<Archive> {
    let metadata: ArchiveMetadata = serde_json::from_value(row.try_get("metadata")?)
        .context("Failed to decode archive metadata")?;
    Ok(Archive {
        id: row.try_get("id")?,
        metadata,
        data: row.try_get("data")?,
        created_at: row.try_get("created_at")?,
        retrieved_count: row.try_get::<i64, _>("retrieved_count")? as u64,
        last_retrieved_at: row.try_get::<Option<DateTime<Utc>>, _>("last_retrieved_at")?,
    })
}

#[async_trait]
impl ArchiveStore for PgArchiveStore {
    async fn insert(&self, archive: &Archive) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_archives (
                id, retention_policy, data_classification,
                range_start, range_end, metadata, data,
                created_at, retrieved_count, last_retrieved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&archive.id)
        .bind(&archive.metadata.retention_policy)
        .bind(archive.metadata.data_classification.to_string())
        .bind(archive.metadata.date_range.map(|r| r.start))
        .bind(archive.metadata.date_range.map(|r| r.end))
        .bind(serde_json::to_value(&archive.metadata).context("Failed to encode metadata")?)
        .bind(&archive.data)
        .bind(archive.created_at)
        .bind(archive.retrieved_count as i64)
        .bind(archive.last_retrieved_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert archive")?;
        Ok(())
    }

    async fn get(&self, archive_id: &str) -> Result<Option<Archive>> {
        let row = sqlx::query("SELECT * FROM audit_archives WHERE id = $1")
            .bind(archive_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load archive")?;
        row.as_ref().map(row_to_archive).transpose()
    }

    async fn query(&self, filter: &ArchiveQuery) -> Result<Vec<Archive>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM audit_archives WHERE TRUE");
        if let Some(id) = &filter.archive_id {
            qb.push(" AND id = ").push_bind(id.clone());
        }
        if let Some(range) = &filter.date_range {
            qb.push(" AND range_start <= ").push_bind(range.end);
            qb.push(" AND range_end >= ").push_bind(range.start);
        }
        if let Some(classifications) = &filter.data_classifications {
            let names: Vec<String> = classifications.iter().map(|c| c.to_string()).collect();
            qb.push(" AND data_classification = ANY(").push_bind(names);
            qb.push(")");
        }
        if let Some(policies) = &filter.retention_policies {
            qb.push(" AND retention_policy = ANY(")
                .push_bind(policies.clone());
            qb.push(")");
        }
        qb.push(" ORDER BY created_at, id");
        qb.push(" LIMIT ").push_bind(filter.limit as i64);
        qb.push(" OFFSET ").push_bind(filter.offset as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query archives")?;
        rows.iter().map(row_to_archive).collect()
    }

    async fn delete(&self, archive_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM audit_archives WHERE id = $1")
            .bind(archive_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete archive")?;
        Ok(())
    }

    async fn record_retrieval(&self, archive_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE audit_archives
            SET retrieved_count = retrieved_count + 1, last_retrieved_at = $2
            WHERE id = $1
            "#,
        )
        .bind(archive_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("Failed to record archive retrieval")?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Archive>> {
        let rows = sqlx::query("SELECT * FROM audit_archives ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list archives")?;
        rows.iter().map(row_to_archive).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PgAuditLogStore {
    pool: PgPool,
}

impl PgAuditLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &'a RecordQuery) {
        if let Some(principal) = &query.principal_id {
            qb.push(" AND principal_id = ").push_bind(principal.clone());
        }
        if let Some(org) = &query.organization_id {
            qb.push(" AND organization_id = ").push_bind(org.clone());
        }
        if let Some(classifications) = &query.data_classifications {
            let names: Vec<String> = classifications.iter().map(|c| c.to_string()).collect();
            qb.push(" AND data_classification = ANY(").push_bind(names);
            qb.push(")");
        }
        if let Some(policies) = &query.retention_policies {
            qb.push(" AND retention_policy = ANY(")
                .push_bind(policies.clone());
            qb.push(")");
        }
        if let Some(range) = &query.date_range {
            qb.push(" AND ts >= ").push_bind(range.start);
            qb.push(" AND ts <= ").push_bind(range.end);
        }
        if query.unarchived_only {
            qb.push(" AND archived_at IS NULL");
        }
        if let Some(before) = query.timestamp_before {
            qb.push(" AND ts < ").push_bind(before);
        }
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<AuditRecord> {
    let classification: DataClassification = row
        .try_get::<String, _>("data_classification")?
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let extras: HashMap<String, serde_json::Value> =
        serde_json::from_value(row.try_get("extras")?).context("Failed to decode record extras")?;
    Ok(AuditRecord {
        id: row.try_get("id")?,
        timestamp: row.try_get("ts")?,
        principal_id: row.try_get("principal_id")?,
        organization_id: row.try_get("organization_id")?,
        action: row.try_get("action")?,
        data_classification: classification,
        retention_policy: row.try_get("retention_policy")?,
        archived_at: row.try_get::<Option<DateTime<Utc>>, _>("archived_at")?,
        extras,
    })
}

#[async_trait]
impl AuditLogStore for PgAuditLogStore {
    async fn insert(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, ts, principal_id, organization_id, action,
                data_classification, retention_policy, archived_at, extras
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.timestamp)
        .bind(&record.principal_id)
        .bind(&record.organization_id)
        .bind(&record.action)
        .bind(record.data_classification.to_string())
        .bind(&record.retention_policy)
        .bind(record.archived_at)
        .bind(serde_json::to_value(&record.extras).context("Failed to encode extras")?)
        .execute(&self.pool)
        .await
        .context("Failed to insert audit record")?;
        Ok(())
    }

    async fn query(&self, query: &RecordQuery) -> Result<Vec<AuditRecord>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM audit_log WHERE TRUE");
        Self::push_filters(&mut qb, query);
        qb.push(" ORDER BY ts, id");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query audit log")?;
        rows.iter().map(row_to_record).collect()
    }

    async fn mark_archived(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("UPDATE audit_log SET archived_at = $1 WHERE id = ANY($2)")
            .bind(at)
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await
            .context("Failed to mark records archived")?;
        Ok(result.rows_affected())
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_log WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await
            .context("Failed to delete audit records")?;
        Ok(result.rows_affected())
    }

    async fn count_existing(&self, ids: &[Uuid]) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_one(&self.pool)
            .await
            .context("Failed to count remaining records")?;
        Ok(count as u64)
    }
}

#[derive(Debug, Clone)]
pub struct PgRetentionPolicyStore {
    pool: PgPool,
}

impl PgRetentionPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetentionPolicyStore for PgRetentionPolicyStore {
    async fn active_policies(&self) -> Result<Vec<RetentionPolicy>> {
        let rows = sqlx::query(
            "SELECT * FROM retention_policies WHERE is_active = TRUE ORDER BY policy_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load retention policies")?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in &rows {
            let classification: DataClassification = row
                .try_get::<String, _>("data_classification")?
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let policy = RetentionPolicy {
                policy_name: row.try_get("policy_name")?,
                data_classification: classification,
                archive_after_days: row.try_get("archive_after_days")?,
                delete_after_days: row.try_get("delete_after_days")?,
                is_active: row.try_get("is_active")?,
            };
            // Hand-edited rows can violate the delete>=archive rule the
            // constructor enforces; surface them instead of running them.
            if let Err(err) = policy.validate() {
                tracing::warn!(policy = %policy.policy_name, %err, "skipping invalid retention policy row");
                continue;
            }
            policies.push(policy);
        }
        Ok(policies)
    }
}
