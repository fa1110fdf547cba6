//! The archival engine

use crate::codec;
use crate::store::{ArchiveQuery, ArchiveStore, AuditLogStore, RecordQuery, RetentionPolicyStore};
use crate::types::{
    Archive, ArchiveConfig, ArchiveMetadata, ArchiveResult, ArchivalError, BatchSummary,
    CleanupReport, DateRange, DeleteCriteria, DeleteOutcome, DeletionVerification, PolicyOutcome,
    PolicyRunReport, RetrievalRequest, RetrievalResult, RetrievedArchive, SecureDeleteResult,
    ValidationReport, VerificationStatus,
};
use audit_relay_contracts::{AuditRecord, Clock, DataClassification, RetentionPolicy};
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_RETRIEVAL_LIMIT: usize = 100;

/// What a batch archive should be labeled with
#[derive(Debug, Clone)]
pub struct CreateArchiveRequest {
    pub retention_policy: String,
    pub data_classification: DataClassification,
    pub date_range: Option<DateRange>,
    pub summary: Option<BatchSummary>,
}

/// Dry-run view of one retention policy
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PolicyPreview {
    pub policy_name: String,
    pub candidate_records: usize,
    pub deletable_records: usize,
}

/// Aggregate statistics over the archive store
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArchiveStats {
    pub total_archives: usize,
    pub total_records: usize,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub overall_compression_ratio: f64,
    pub total_retrievals: u64,
    pub oldest_archive: Option<DateTime<Utc>>,
    pub newest_archive: Option<DateTime<Utc>>,
}

pub struct ArchivalEngine {
    archives: Arc<dyn ArchiveStore>,
    records: Arc<dyn AuditLogStore>,
    policies: Arc<dyn RetentionPolicyStore>,
    config: ArchiveConfig,
    clock: Arc<dyn Clock>,
}

impl ArchivalEngine {
    pub fn new(
        archives: Arc<dyn ArchiveStore>,
        records: Arc<dyn AuditLogStore>,
        policies: Arc<dyn RetentionPolicyStore>,
        config: ArchiveConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            archives,
            records,
            policies,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Serialize, checksum, compress, persist, and optionally verify one
    /// batch of records.
    pub async fn create_archive(
        &self,
        records: &[AuditRecord],
        request: CreateArchiveRequest,
    ) -> Result<ArchiveResult, ArchivalError> {
        if records.is_empty() {
            return Err(ArchivalError::EmptyBatch);
        }
        let started = Instant::now();

        let serialized = codec::serialize_records(records, self.config.format)?;
        let original_size = serialized.len();
        let checksum_original = codec::sha256_hex(&serialized);

        let compressed = codec::compress(
            &serialized,
            self.config.compression,
            self.config.compression_level,
        )?;
        let compressed_size = compressed.len();
        let checksum_compressed = codec::sha256_hex(&compressed);
        let compression_ratio = compressed_size as f64 / original_size as f64;

        let now = self.clock.now();
        let date_range = request.date_range.or_else(|| infer_date_range(records));
        let archive = Archive {
            id: self.new_archive_id(now),
            metadata: ArchiveMetadata {
                record_count: records.len(),
                original_size,
                compressed_size,
                compression_ratio,
                checksum_original: checksum_original.clone(),
                checksum_compressed: checksum_compressed.clone(),
                retention_policy: request.retention_policy,
                data_classification: request.data_classification,
                date_range,
                config: self.config.clone(),
                created_at: now,
                summary: request.summary,
            },
            data: compressed,
            created_at: now,
            retrieved_count: 0,
            last_retrieved_at: None,
        };
        self.archives.insert(&archive).await?;

        let verification_status = if self.config.verify_integrity {
            match self.verify_stored_archive(&archive.id).await {
                Ok(true) => VerificationStatus::Verified,
                Ok(false) => {
                    warn!(archive_id = %archive.id, "archive failed post-write verification");
                    VerificationStatus::Failed
                }
                Err(err) => {
                    warn!(archive_id = %archive.id, %err, "archive verification errored");
                    VerificationStatus::Failed
                }
            }
        } else {
            VerificationStatus::Skipped
        };

        info!(
            archive_id = %archive.id,
            record_count = records.len(),
            original_size,
            compressed_size,
            "archive created"
        );

        Ok(ArchiveResult {
            archive_id: archive.id,
            record_count: records.len(),
            original_size,
            compressed_size,
            compression_ratio,
            checksum_original,
            checksum_compressed,
            verification_status,
            processing_time_ms: started.elapsed().as_millis() as u64,
            created_at: now,
        })
    }

    /// Run every active retention policy. A failure in one policy is
    /// logged and reported; it never aborts the remaining policies.
    pub async fn archive_by_retention_policies(
        &self,
    ) -> Result<Vec<PolicyRunReport>, ArchivalError> {
        let policies = self.policies.active_policies().await?;
        let mut reports = Vec::with_capacity(policies.len());

        for policy in policies {
            let policy_name = policy.policy_name.clone();
            let outcome = match self.run_policy(&policy).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(policy = %policy_name, %err, "retention policy run failed");
                    PolicyOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            reports.push(PolicyRunReport {
                policy_name,
                outcome,
            });
        }
        Ok(reports)
    }

    async fn run_policy(&self, policy: &RetentionPolicy) -> Result<PolicyOutcome, ArchivalError> {
        // Storage may hold hand-edited rows the constructor never saw.
        policy
            .validate()
            .map_err(|e| ArchivalError::Storage(anyhow::anyhow!(e)))?;

        let now = self.clock.now();
        let cutoff = now - Duration::days(policy.archive_after_days);
        let candidates = self
            .records
            .query(&policy_query(policy, cutoff, true))
            .await?;
        if candidates.is_empty() {
            return Ok(PolicyOutcome::Skipped {
                reason: "no eligible records".to_string(),
            });
        }

        let summary = BatchSummary::of(&candidates);
        let result = self
            .create_archive(
                &candidates,
                CreateArchiveRequest {
                    retention_policy: policy.policy_name.clone(),
                    data_classification: policy.data_classification,
                    date_range: None,
                    summary: Some(summary),
                },
            )
            .await?;

        let ids: Vec<Uuid> = candidates.iter().map(|r| r.id).collect();
        self.records.mark_archived(&ids, now).await?;

        let mut records_deleted = 0;
        if let Some(delete_after) = policy.delete_after_days {
            let delete_cutoff = now - Duration::days(delete_after);
            let expired = self
                .records
                .query(&policy_query(policy, delete_cutoff, false))
                .await?;
            if !expired.is_empty() {
                let expired_ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
                records_deleted = self.records.delete_by_ids(&expired_ids).await?;
                info!(
                    policy = %policy.policy_name,
                    records_deleted,
                    "purged live records past the delete window"
                );
            }
        }

        Ok(PolicyOutcome::Archived {
            records_archived: ids.len(),
            records_deleted,
            result,
        })
    }

    /// Run a single active policy by name. Returns `None` when no active
    /// policy carries that name.
    pub async fn archive_policy_by_name(
        &self,
        policy_name: &str,
    ) -> Result<Option<PolicyRunReport>, ArchivalError> {
        let policies = self.policies.active_policies().await?;
        let Some(policy) = policies.into_iter().find(|p| p.policy_name == policy_name) else {
            return Ok(None);
        };
        let outcome = match self.run_policy(&policy).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(policy = %policy.policy_name, %err, "retention policy run failed");
                PolicyOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        Ok(Some(PolicyRunReport {
            policy_name: policy.policy_name,
            outcome,
        }))
    }

    /// Aggregate statistics over every stored archive.
    pub async fn stats(&self) -> Result<ArchiveStats, ArchivalError> {
        let archives = self.archives.list_all().await?;
        let mut stats = ArchiveStats {
            total_archives: archives.len(),
            ..Default::default()
        };
        for archive in &archives {
            stats.total_records += archive.metadata.record_count;
            stats.total_original_size += archive.metadata.original_size as u64;
            stats.total_compressed_size += archive.metadata.compressed_size as u64;
            stats.total_retrievals += archive.retrieved_count;
        }
        if stats.total_original_size > 0 {
            stats.overall_compression_ratio =
                stats.total_compressed_size as f64 / stats.total_original_size as f64;
        }
        stats.oldest_archive = archives.first().map(|a| a.created_at);
        stats.newest_archive = archives.last().map(|a| a.created_at);
        Ok(stats)
    }

    /// Dry-run counterpart of [`Self::archive_by_retention_policies`]:
    /// reports what each policy would touch without mutating anything.
    pub async fn preview_retention(&self) -> Result<Vec<PolicyPreview>, ArchivalError> {
        let policies = self.policies.active_policies().await?;
        let now = self.clock.now();
        let mut previews = Vec::with_capacity(policies.len());

        for policy in policies {
            let cutoff = now - Duration::days(policy.archive_after_days);
            let candidate_records = self
                .records
                .query(&policy_query(&policy, cutoff, true))
                .await?
                .len();
            let deletable_records = match policy.delete_after_days {
                Some(delete_after) => {
                    let delete_cutoff = now - Duration::days(delete_after);
                    self.records
                        .query(&policy_query(&policy, delete_cutoff, false))
                        .await?
                        .len()
                }
                None => 0,
            };
            previews.push(PolicyPreview {
                policy_name: policy.policy_name,
                candidate_records,
                deletable_records,
            });
        }
        Ok(previews)
    }

    /// Compliance retrieval. Decompression and deserialization always use
    /// the parameters recorded in each archive's own metadata.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
    ) -> Result<RetrievalResult, ArchivalError> {
        let started = Instant::now();
        let query = ArchiveQuery {
            archive_id: request.archive_id.clone(),
            date_range: request.date_range,
            data_classifications: request.data_classifications.clone(),
            retention_policies: request.retention_policies.clone(),
            limit: request.limit.unwrap_or(DEFAULT_RETRIEVAL_LIMIT),
            offset: request.offset.unwrap_or(0),
        };
        let candidates = self.archives.query(&query).await?;

        let now = self.clock.now();
        let mut archives = Vec::new();
        let mut record_count = 0;
        let mut total_size = 0;

        for archive in candidates {
            let stored = codec::decode_stored_payload(&archive.data, archive.metadata.config.compression);
            let decompressed = codec::decompress(&stored, archive.metadata.config.compression)?;
            let records = codec::deserialize_records(&decompressed, archive.metadata.config.format)?;
            let filtered = apply_record_filters(records, request);
            if filtered.is_empty() {
                continue;
            }

            self.archives.record_retrieval(&archive.id, now).await?;
            record_count += filtered.len();
            total_size += decompressed.len();
            archives.push(RetrievedArchive {
                archive_id: archive.id,
                metadata: archive.metadata,
                records: filtered,
            });
        }

        Ok(RetrievalResult {
            request_id: Uuid::new_v4().to_string(),
            retrieved_at: now,
            record_count,
            total_size,
            retrieval_time_ms: started.elapsed().as_millis() as u64,
            archives,
        })
    }

    /// Compliance-grade deletion from the live audit log, optionally
    /// verified by re-querying the deleted ids.
    pub async fn secure_delete(
        &self,
        criteria: &DeleteCriteria,
    ) -> Result<SecureDeleteResult, ArchivalError> {
        let matches = self.records.query(&delete_query(criteria)).await?;
        if matches.is_empty() {
            return Ok(SecureDeleteResult {
                records_deleted: 0,
                status: DeleteOutcome::Skipped,
                verification: None,
            });
        }

        let ids: Vec<Uuid> = matches.iter().map(|r| r.id).collect();
        let deleted = self.records.delete_by_ids(&ids).await?;

        let verification = if criteria.verify_deletion {
            let remaining = self.records.count_existing(&ids).await?;
            Some(DeletionVerification {
                verified: remaining == 0,
                remaining_records: remaining as usize,
            })
        } else {
            None
        };

        info!(records_deleted = deleted, "secure deletion completed");
        Ok(SecureDeleteResult {
            records_deleted: deleted as usize,
            status: DeleteOutcome::Deleted,
            verification,
        })
    }

    /// Count the records a [`DeleteCriteria`] would remove, for dry runs.
    pub async fn count_matching_records(
        &self,
        criteria: &DeleteCriteria,
    ) -> Result<usize, ArchivalError> {
        Ok(self.records.query(&delete_query(criteria)).await?.len())
    }

    /// Recompute both checksums for every stored archive. Never
    /// short-circuits; every archive is reported.
    pub async fn validate_all_archives(&self) -> Result<ValidationReport, ArchivalError> {
        let archives = self.archives.list_all().await?;
        let total_archives = archives.len();
        let mut corrupted_ids = Vec::new();

        for archive in &archives {
            if !check_integrity(archive) {
                warn!(archive_id = %archive.id, "archive integrity check failed");
                corrupted_ids.push(archive.id.clone());
            }
        }

        Ok(ValidationReport {
            total_archives,
            verified: total_archives - corrupted_ids.len(),
            corrupted: corrupted_ids.len(),
            corrupted_ids,
        })
    }

    /// Delete archives older than their policy's delete window. Policy
    /// failures are isolated, as in the retention run.
    pub async fn cleanup_old_archives(&self) -> Result<CleanupReport, ArchivalError> {
        self.cleanup_inner(false).await
    }

    /// Dry-run counterpart of [`Self::cleanup_old_archives`].
    pub async fn preview_cleanup(&self) -> Result<CleanupReport, ArchivalError> {
        self.cleanup_inner(true).await
    }

    async fn cleanup_inner(&self, dry_run: bool) -> Result<CleanupReport, ArchivalError> {
        let policies = self.policies.active_policies().await?;
        let now = self.clock.now();
        let mut report = CleanupReport::default();

        for policy in policies {
            let Some(delete_after) = policy.delete_after_days else {
                continue;
            };
            let cutoff = now - Duration::days(delete_after);
            let aged = match self.archives.list_all().await {
                Ok(all) => all
                    .into_iter()
                    .filter(|a| {
                        a.metadata.retention_policy == policy.policy_name && a.created_at < cutoff
                    })
                    .collect::<Vec<_>>(),
                Err(err) => {
                    error!(policy = %policy.policy_name, %err, "cleanup listing failed");
                    continue;
                }
            };

            for archive in aged {
                if !dry_run {
                    if let Err(err) = self.archives.delete(&archive.id).await {
                        error!(archive_id = %archive.id, %err, "archive deletion failed");
                        continue;
                    }
                }
                report.archives_deleted += 1;
                report.space_freed += archive.metadata.compressed_size as u64;
                report.deleted_ids.push(archive.id);
            }
        }

        if !dry_run && report.archives_deleted > 0 {
            info!(
                archives_deleted = report.archives_deleted,
                space_freed = report.space_freed,
                "aged archives cleaned up"
            );
        }
        Ok(report)
    }

    async fn verify_stored_archive(&self, archive_id: &str) -> Result<bool, ArchivalError> {
        let archive = self
            .archives
            .get(archive_id)
            .await?
            .ok_or_else(|| ArchivalError::ArchiveNotFound(archive_id.to_string()))?;
        Ok(check_integrity(&archive))
    }

    fn new_archive_id(&self, now: DateTime<Utc>) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        format!("archive-{}-{}", now.timestamp_millis(), suffix)
    }
}

impl std::fmt::Debug for ArchivalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivalEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// Both checksums recomputed from the stored payload; any failure along
/// the way marks the archive corrupted.
fn check_integrity(archive: &Archive) -> bool {
    let stored = codec::decode_stored_payload(&archive.data, archive.metadata.config.compression);
    if codec::sha256_hex(&stored) != archive.metadata.checksum_compressed {
        return false;
    }
    match codec::decompress(&stored, archive.metadata.config.compression) {
        Ok(decompressed) => codec::sha256_hex(&decompressed) == archive.metadata.checksum_original,
        Err(_) => false,
    }
}

fn infer_date_range(records: &[AuditRecord]) -> Option<DateRange> {
    let start = records.iter().map(|r| r.timestamp).min()?;
    let end = records.iter().map(|r| r.timestamp).max()?;
    Some(DateRange { start, end })
}

fn policy_query(
    policy: &RetentionPolicy,
    cutoff: DateTime<Utc>,
    unarchived_only: bool,
) -> RecordQuery {
    RecordQuery {
        data_classifications: Some(vec![policy.data_classification]),
        retention_policies: Some(vec![policy.policy_name.clone()]),
        timestamp_before: Some(cutoff),
        unarchived_only,
        ..Default::default()
    }
}

fn delete_query(criteria: &DeleteCriteria) -> RecordQuery {
    RecordQuery {
        principal_id: criteria.principal_id.clone(),
        organization_id: criteria.organization_id.clone(),
        data_classifications: criteria.data_classifications.clone(),
        retention_policies: criteria.retention_policies.clone(),
        date_range: criteria.date_range,
        ..Default::default()
    }
}

fn apply_record_filters(records: Vec<AuditRecord>, request: &RetrievalRequest) -> Vec<AuditRecord> {
    records
        .into_iter()
        .filter(|r| {
            if let Some(org) = &request.organization_id {
                if &r.organization_id != org {
                    return false;
                }
            }
            if let Some(principal) = &request.principal_id {
                if &r.principal_id != principal {
                    return false;
                }
            }
            if let Some(actions) = &request.actions {
                if !actions.contains(&r.action) {
                    return false;
                }
            }
            if let Some(range) = &request.date_range {
                if !range.contains(r.timestamp) {
                    return false;
                }
            }
            if let Some(classifications) = &request.data_classifications {
                if !classifications.contains(&r.data_classification) {
                    return false;
                }
            }
            true
        })
        .collect()
}
