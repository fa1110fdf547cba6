//! End-to-end archival engine behavior over the in-memory stores

use audit_relay_archival::{
    ArchivalEngine, Archive, ArchiveConfig, ArchiveFormat, ArchiveStore, AuditLogStore,
    CompressionAlgorithm, CreateArchiveRequest, DateRange, DeleteCriteria, DeleteOutcome,
    MemoryArchiveStore, MemoryAuditLogStore, MemoryPolicyStore, RetrievalRequest,
    VerificationStatus,
};
use audit_relay_contracts::{
    AuditRecord, Clock, DataClassification, ManualClock, RetentionPolicy,
};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

struct Harness {
    engine: ArchivalEngine,
    archives: Arc<MemoryArchiveStore>,
    records: Arc<MemoryAuditLogStore>,
    policies: Arc<MemoryPolicyStore>,
    clock: ManualClock,
}

fn harness(config: ArchiveConfig) -> Harness {
    let archives = Arc::new(MemoryArchiveStore::new());
    let records = Arc::new(MemoryAuditLogStore::new());
    let policies = Arc::new(MemoryPolicyStore::new());
    let clock = ManualClock::starting_at(Utc::now());
    let engine = ArchivalEngine::new(
        archives.clone(),
        records.clone(),
        policies.clone(),
        config,
        Arc::new(clock.clone()),
    );
    Harness {
        engine,
        archives,
        records,
        policies,
        clock,
    }
}

fn phi_records(n: usize, clock: &ManualClock) -> Vec<AuditRecord> {
    (0..n)
        .map(|i| {
            AuditRecord::new(
                format!("clinician-{i}"),
                "org-A",
                "chart.read",
                DataClassification::Phi,
                "phi-retention",
                clock.now() - Duration::hours(i as i64 + 1),
            )
        })
        .collect()
}

fn request() -> CreateArchiveRequest {
    CreateArchiveRequest {
        retention_policy: "phi-retention".to_string(),
        data_classification: DataClassification::Phi,
        date_range: None,
        summary: None,
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[tokio::test]
async fn phi_archive_round_trip_with_matching_checksum() {
    let h = harness(ArchiveConfig::default());
    let records = phi_records(3, &h.clock);

    let result = h.engine.create_archive(&records, request()).await.unwrap();
    assert_eq!(result.record_count, 3);
    assert_eq!(result.verification_status, VerificationStatus::Verified);
    assert!(result.compression_ratio > 0.0 && result.compression_ratio <= 1.0);

    let retrieved = h
        .engine
        .retrieve(&RetrievalRequest {
            data_classifications: Some(vec![DataClassification::Phi]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(retrieved.record_count, 3);
    assert_eq!(retrieved.archives.len(), 1);
    assert_eq!(retrieved.archives[0].records, records);

    // checksum_original is the digest of the serialized record batch.
    let stored = h.archives.get(&result.archive_id).await.unwrap().unwrap();
    assert_eq!(stored.metadata.compressed_size, stored.data.len());
    let reserialized: Vec<u8> = {
        let mut out = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                out.push(b'\n');
            }
            out.extend_from_slice(&serde_json::to_vec(record).unwrap());
        }
        out
    };
    assert_eq!(stored.metadata.checksum_original, sha256_hex(&reserialized));
}

#[tokio::test]
async fn repeated_retrieval_is_byte_stable_and_counts_accesses() {
    let h = harness(ArchiveConfig::default());
    let records = phi_records(2, &h.clock);
    let result = h.engine.create_archive(&records, request()).await.unwrap();

    let by_id = RetrievalRequest {
        archive_id: Some(result.archive_id.clone()),
        ..Default::default()
    };
    let first = h.engine.retrieve(&by_id).await.unwrap();
    let second = h.engine.retrieve(&by_id).await.unwrap();
    assert_eq!(first.archives[0].records, second.archives[0].records);

    let stored = h.archives.get(&result.archive_id).await.unwrap().unwrap();
    assert_eq!(stored.retrieved_count, 2);
    assert!(stored.last_retrieved_at.is_some());
}

#[tokio::test]
async fn retrieval_uses_recorded_config_not_current_config() {
    // Create with deflate+json, then retrieve through an engine whose
    // current config is gzip+jsonl. The recorded metadata must win.
    let h = harness(ArchiveConfig {
        format: ArchiveFormat::Json,
        compression: CompressionAlgorithm::Deflate,
        ..Default::default()
    });
    let records = phi_records(2, &h.clock);
    let result = h.engine.create_archive(&records, request()).await.unwrap();

    let reader = ArchivalEngine::new(
        h.archives.clone(),
        h.records.clone(),
        h.policies.clone(),
        ArchiveConfig::default(),
        Arc::new(h.clock.clone()),
    );
    let retrieved = reader
        .retrieve(&RetrievalRequest {
            archive_id: Some(result.archive_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(retrieved.archives[0].records, records);
}

#[tokio::test]
async fn record_filters_narrow_retrieval() {
    let h = harness(ArchiveConfig::default());
    let mut records = phi_records(3, &h.clock);
    records[0].action = "chart.export".to_string();
    h.engine.create_archive(&records, request()).await.unwrap();

    let retrieved = h
        .engine
        .retrieve(&RetrievalRequest {
            actions: Some(vec!["chart.export".to_string()]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(retrieved.record_count, 1);
    assert_eq!(retrieved.archives[0].records[0].action, "chart.export");

    let none = h
        .engine
        .retrieve(&RetrievalRequest {
            principal_id: Some("nobody".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(none.record_count, 0);
    assert!(none.archives.is_empty());
}

#[tokio::test]
async fn organization_scope_isolates_retrieval() {
    let h = harness(ArchiveConfig::default());
    let mut records = phi_records(2, &h.clock);
    records[1].organization_id = "org-B".to_string();
    h.engine.create_archive(&records, request()).await.unwrap();

    let org_a = h
        .engine
        .retrieve(&RetrievalRequest {
            organization_id: Some("org-A".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(org_a.record_count, 1);
    assert!(org_a.archives[0]
        .records
        .iter()
        .all(|r| r.organization_id == "org-A"));

    let org_c = h
        .engine
        .retrieve(&RetrievalRequest {
            organization_id: Some("org-C".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(org_c.record_count, 0);
    assert!(org_c.archives.is_empty());
}

#[tokio::test]
async fn retention_run_archives_marks_and_purges() {
    let h = harness(ArchiveConfig::default());
    h.policies.push(
        RetentionPolicy::new("phi-retention", DataClassification::Phi, 30, Some(365)).unwrap(),
    );

    let now = h.clock.now();
    let eligible = AuditRecord::new(
        "clinician-1",
        "org-A",
        "chart.read",
        DataClassification::Phi,
        "phi-retention",
        now - Duration::days(45),
    );
    let fresh = AuditRecord::new(
        "clinician-2",
        "org-A",
        "chart.read",
        DataClassification::Phi,
        "phi-retention",
        now - Duration::days(2),
    );
    let expired = AuditRecord::new(
        "clinician-3",
        "org-A",
        "chart.read",
        DataClassification::Phi,
        "phi-retention",
        now - Duration::days(400),
    );
    for record in [&eligible, &fresh, &expired] {
        h.records.insert(record).await.unwrap();
    }

    let reports = h.engine.archive_by_retention_policies().await.unwrap();
    assert_eq!(reports.len(), 1);
    match &reports[0].outcome {
        audit_relay_archival::PolicyOutcome::Archived {
            records_archived,
            records_deleted,
            result,
        } => {
            // eligible + expired are both past the archive cutoff.
            assert_eq!(*records_archived, 2);
            assert_eq!(*records_deleted, 1);
            assert!(result.archive_id.starts_with("archive-"));
            assert!(result.compression_ratio <= 1.0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The fresh record is untouched, the expired one purged.
    assert_eq!(h.records.len(), 2);
    let remaining = h
        .records
        .query(&audit_relay_archival::RecordQuery::default())
        .await
        .unwrap();
    assert!(remaining.iter().any(|r| r.id == fresh.id));
    assert!(remaining.iter().any(|r| r.id == eligible.id && r.archived_at.is_some()));
}

#[tokio::test]
async fn empty_policies_are_skipped_and_failures_are_isolated() {
    let h = harness(ArchiveConfig::default());
    // An invalid policy slipped into storage bypassing the constructor.
    h.policies.push(RetentionPolicy {
        policy_name: "broken".to_string(),
        data_classification: DataClassification::Public,
        archive_after_days: 30,
        delete_after_days: Some(7),
        is_active: true,
    });
    h.policies.push(
        RetentionPolicy::new("phi-retention", DataClassification::Phi, 30, None).unwrap(),
    );
    h.records
        .insert(&AuditRecord::new(
            "u1",
            "org-A",
            "chart.read",
            DataClassification::Phi,
            "phi-retention",
            h.clock.now() - Duration::days(60),
        ))
        .await
        .unwrap();

    let reports = h.engine.archive_by_retention_policies().await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(matches!(
        reports[0].outcome,
        audit_relay_archival::PolicyOutcome::Failed { .. }
    ));
    // The broken policy did not abort the healthy one.
    assert!(matches!(
        reports[1].outcome,
        audit_relay_archival::PolicyOutcome::Archived { .. }
    ));
}

#[tokio::test]
async fn secure_delete_skips_verifies_and_reports() {
    let h = harness(ArchiveConfig::default());

    let empty = h
        .engine
        .secure_delete(&DeleteCriteria {
            principal_id: Some("ghost".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(empty.records_deleted, 0);
    assert_eq!(empty.status, DeleteOutcome::Skipped);

    for record in phi_records(3, &h.clock) {
        h.records.insert(&record).await.unwrap();
    }
    let deleted = h
        .engine
        .secure_delete(&DeleteCriteria {
            data_classifications: Some(vec![DataClassification::Phi]),
            verify_deletion: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(deleted.records_deleted, 3);
    assert_eq!(deleted.status, DeleteOutcome::Deleted);
    let verification = deleted.verification.unwrap();
    assert!(verification.verified);
    assert_eq!(verification.remaining_records, 0);
    assert!(h.records.is_empty());
}

#[tokio::test]
async fn validation_flags_tampered_archives() {
    let h = harness(ArchiveConfig::default());
    let good = h
        .engine
        .create_archive(&phi_records(2, &h.clock), request())
        .await
        .unwrap();
    let bad = h
        .engine
        .create_archive(&phi_records(2, &h.clock), request())
        .await
        .unwrap();

    // Corrupt the second archive's payload behind the engine's back.
    let mut tampered: Archive = h.archives.get(&bad.archive_id).await.unwrap().unwrap();
    tampered.data[0] ^= 0xff;
    h.archives.insert(&tampered).await.unwrap();

    let report = h.engine.validate_all_archives().await.unwrap();
    assert_eq!(report.total_archives, 2);
    assert_eq!(report.verified, 1);
    assert_eq!(report.corrupted, 1);
    assert_eq!(report.corrupted_ids, vec![bad.archive_id.clone()]);
    assert!(!report.corrupted_ids.contains(&good.archive_id));
}

#[tokio::test]
async fn cleanup_deletes_aged_archives_then_is_idempotent() {
    let h = harness(ArchiveConfig::default());
    h.policies.push(
        RetentionPolicy::new("phi-retention", DataClassification::Phi, 30, Some(90)).unwrap(),
    );

    let result = h
        .engine
        .create_archive(&phi_records(2, &h.clock), request())
        .await
        .unwrap();

    // Not aged yet.
    let untouched = h.engine.cleanup_old_archives().await.unwrap();
    assert_eq!(untouched.archives_deleted, 0);

    h.clock.advance(Duration::days(91));
    let cleaned = h.engine.cleanup_old_archives().await.unwrap();
    assert_eq!(cleaned.archives_deleted, 1);
    assert_eq!(cleaned.space_freed, result.compressed_size as u64);

    // Already-clean store: nothing left to delete.
    let again = h.engine.cleanup_old_archives().await.unwrap();
    assert_eq!(again.archives_deleted, 0);
    assert_eq!(again.space_freed, 0);
}

#[tokio::test]
async fn previews_report_without_mutating() {
    let h = harness(ArchiveConfig::default());
    h.policies.push(
        RetentionPolicy::new("phi-retention", DataClassification::Phi, 30, Some(90)).unwrap(),
    );
    h.records
        .insert(&AuditRecord::new(
            "u1",
            "org-A",
            "chart.read",
            DataClassification::Phi,
            "phi-retention",
            h.clock.now() - Duration::days(45),
        ))
        .await
        .unwrap();

    let previews = h.engine.preview_retention().await.unwrap();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].candidate_records, 1);
    assert_eq!(previews[0].deletable_records, 0);
    // Nothing was archived or marked.
    assert_eq!(h.archives.list_all().await.unwrap().len(), 0);
    assert_eq!(h.records.len(), 1);

    let cleanup = h.engine.preview_cleanup().await.unwrap();
    assert_eq!(cleanup.archives_deleted, 0);
}

#[tokio::test]
async fn date_range_filters_select_intersecting_archives() {
    let h = harness(ArchiveConfig::default());
    let now = h.clock.now();
    let old_records = vec![AuditRecord::new(
        "u1",
        "org-A",
        "chart.read",
        DataClassification::Phi,
        "phi-retention",
        now - Duration::days(200),
    )];
    let new_records = vec![AuditRecord::new(
        "u2",
        "org-A",
        "chart.read",
        DataClassification::Phi,
        "phi-retention",
        now - Duration::days(1),
    )];
    h.engine.create_archive(&old_records, request()).await.unwrap();
    h.engine.create_archive(&new_records, request()).await.unwrap();

    let recent_only = h
        .engine
        .retrieve(&RetrievalRequest {
            date_range: Some(DateRange {
                start: now - Duration::days(7),
                end: now,
            }),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(recent_only.archives.len(), 1);
    assert_eq!(recent_only.archives[0].records[0].principal_id, "u2");
}
