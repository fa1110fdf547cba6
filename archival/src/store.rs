//! Storage ports consumed by the archival engine, with in-memory
//! implementations

use crate::types::{Archive, DateRange};
use async_trait::async_trait;
use audit_relay_contracts::{AuditRecord, DataClassification, RetentionPolicy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

/// Archive-level selection filters
#[derive(Debug, Clone, Default)]
pub struct ArchiveQuery {
    pub archive_id: Option<String>,
    /// Matches archives whose metadata date range intersects this range.
    pub date_range: Option<DateRange>,
    pub data_classifications: Option<Vec<DataClassification>>,
    pub retention_policies: Option<Vec<String>>,
    pub limit: usize,
    pub offset: usize,
}

/// Record-level selection over the live audit log
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    pub data_classifications: Option<Vec<DataClassification>>,
    pub retention_policies: Option<Vec<String>>,
    pub date_range: Option<DateRange>,
    /// Only records not yet marked archived.
    pub unarchived_only: bool,
    /// Only records strictly older than this cutoff.
    pub timestamp_before: Option<DateTime<Utc>>,
}

impl RecordQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(principal) = &self.principal_id {
            if &record.principal_id != principal {
                return false;
            }
        }
        if let Some(org) = &self.organization_id {
            if &record.organization_id != org {
                return false;
            }
        }
        if let Some(classifications) = &self.data_classifications {
            if !classifications.contains(&record.data_classification) {
                return false;
            }
        }
        if let Some(policies) = &self.retention_policies {
            if !policies.contains(&record.retention_policy) {
                return false;
            }
        }
        if let Some(range) = &self.date_range {
            if !range.contains(record.timestamp) {
                return false;
            }
        }
        if self.unarchived_only && record.archived_at.is_some() {
            return false;
        }
        if let Some(before) = self.timestamp_before {
            if record.timestamp >= before {
                return false;
            }
        }
        true
    }
}

/// Archive persistence port
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn insert(&self, archive: &Archive) -> anyhow::Result<()>;

    async fn get(&self, archive_id: &str) -> anyhow::Result<Option<Archive>>;

    /// Filtered, paginated selection ordered by creation time ascending.
    async fn query(&self, filter: &ArchiveQuery) -> anyhow::Result<Vec<Archive>>;

    async fn delete(&self, archive_id: &str) -> anyhow::Result<()>;

    /// Monotonic retrieval-stat bump, the only permitted mutation.
    async fn record_retrieval(&self, archive_id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn list_all(&self) -> anyhow::Result<Vec<Archive>>;
}

/// Live audit-log port
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn insert(&self, record: &AuditRecord) -> anyhow::Result<()>;

    async fn query(&self, query: &RecordQuery) -> anyhow::Result<Vec<AuditRecord>>;

    async fn mark_archived(&self, ids: &[Uuid], at: DateTime<Utc>) -> anyhow::Result<u64>;

    async fn delete_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<u64>;

    /// How many of the given ids still exist; used by deletion
    /// verification.
    async fn count_existing(&self, ids: &[Uuid]) -> anyhow::Result<u64>;
}

/// Retention-policy source
#[async_trait]
pub trait RetentionPolicyStore: Send + Sync {
    async fn active_policies(&self) -> anyhow::Result<Vec<RetentionPolicy>>;
}

/// In-memory archive store
#[derive(Debug, Default)]
pub struct MemoryArchiveStore {
    archives: DashMap<String, Archive>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn insert(&self, archive: &Archive) -> anyhow::Result<()> {
        self.archives.insert(archive.id.clone(), archive.clone());
        Ok(())
    }

    async fn get(&self, archive_id: &str) -> anyhow::Result<Option<Archive>> {
        Ok(self.archives.get(archive_id).map(|a| a.clone()))
    }

    async fn query(&self, filter: &ArchiveQuery) -> anyhow::Result<Vec<Archive>> {
        let mut matches: Vec<Archive> = self
            .archives
            .iter()
            .filter(|a| {
                if let Some(id) = &filter.archive_id {
                    if &a.id != id {
                        return false;
                    }
                }
                if let Some(range) = &filter.date_range {
                    match &a.metadata.date_range {
                        Some(meta_range) if meta_range.intersects(range) => {}
                        _ => return false,
                    }
                }
                if let Some(classifications) = &filter.data_classifications {
                    if !classifications.contains(&a.metadata.data_classification) {
                        return false;
                    }
                }
                if let Some(policies) = &filter.retention_policies {
                    if !policies.contains(&a.metadata.retention_policy) {
                        return false;
                    }
                }
                true
            })
            .map(|a| a.clone())
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matches
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn delete(&self, archive_id: &str) -> anyhow::Result<()> {
        self.archives.remove(archive_id);
        Ok(())
    }

    async fn record_retrieval(&self, archive_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(mut archive) = self.archives.get_mut(archive_id) {
            archive.retrieved_count += 1;
            archive.last_retrieved_at = Some(at);
        }
        Ok(())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Archive>> {
        let mut all: Vec<Archive> = self.archives.iter().map(|a| a.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }
}

/// In-memory audit log
#[derive(Debug, Default)]
pub struct MemoryAuditLogStore {
    records: DashMap<Uuid, AuditRecord>,
}

impl MemoryAuditLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AuditLogStore for MemoryAuditLogStore {
    async fn insert(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn query(&self, query: &RecordQuery) -> anyhow::Result<Vec<AuditRecord>> {
        let mut matches: Vec<AuditRecord> = self
            .records
            .iter()
            .filter(|r| query.matches(r))
            .map(|r| r.clone())
            .collect();
        matches.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(matches)
    }

    async fn mark_archived(&self, ids: &[Uuid], at: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut marked = 0;
        for id in ids {
            if let Some(mut record) = self.records.get_mut(id) {
                record.archived_at = Some(at);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut deleted = 0;
        for id in ids {
            if self.records.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn count_existing(&self, ids: &[Uuid]) -> anyhow::Result<u64> {
        Ok(ids.iter().filter(|id| self.records.contains_key(id)).count() as u64)
    }
}

/// In-memory retention-policy table
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<Vec<RetentionPolicy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, policy: RetentionPolicy) {
        self.policies.write().push(policy);
    }
}

#[async_trait]
impl RetentionPolicyStore for MemoryPolicyStore {
    async fn active_policies(&self) -> anyhow::Result<Vec<RetentionPolicy>> {
        Ok(self
            .policies
            .read()
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }
}
