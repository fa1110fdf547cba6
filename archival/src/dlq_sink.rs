//! Hand-off from the dead-letter queue into the archival engine

use crate::engine::{ArchivalEngine, CreateArchiveRequest};
use async_trait::async_trait;
use audit_relay_contracts::{AuditRecord, DataClassification};
use audit_relay_dlq::{ArchiveSink, DeadLetterEvent};
use std::sync::Arc;
use tracing::info;

/// Retention policy label applied to quarantined payloads that no longer
/// carry a parseable audit record.
const QUARANTINE_POLICY: &str = "dead-letter";

/// Archives dead-letter events that aged past the DLQ archive window.
///
/// The quarantined payload is opaque; when it still parses as an audit
/// record the archive is labeled with that record's own policy and
/// classification, otherwise the payload is wrapped and archived under
/// the quarantine policy.
pub struct DeadLetterArchiveSink {
    engine: Arc<ArchivalEngine>,
}

impl DeadLetterArchiveSink {
    pub fn new(engine: Arc<ArchivalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ArchiveSink for DeadLetterArchiveSink {
    async fn archive(&self, event: &DeadLetterEvent) -> anyhow::Result<()> {
        let record = match serde_json::from_value::<AuditRecord>(event.original_event.clone()) {
            Ok(record) => record,
            Err(_) => wrap_opaque_payload(event),
        };
        let request = CreateArchiveRequest {
            retention_policy: record.retention_policy.clone(),
            data_classification: record.data_classification,
            date_range: None,
            summary: None,
        };
        let result = self.engine.create_archive(&[record], request).await?;
        info!(
            archive_id = %result.archive_id,
            failure_reason = %event.failure_reason,
            "dead-letter event archived"
        );
        Ok(())
    }
}

fn wrap_opaque_payload(event: &DeadLetterEvent) -> AuditRecord {
    let mut record = AuditRecord::new(
        "unknown",
        "unknown",
        "dead_letter.quarantine",
        DataClassification::Internal,
        QUARANTINE_POLICY,
        event.first_failure_time,
    );
    record
        .extras
        .insert("original_event".to_string(), event.original_event.clone());
    record.extras.insert(
        "failure_reason".to_string(),
        serde_json::Value::String(event.failure_reason.clone()),
    );
    record
}
