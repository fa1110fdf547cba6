//! Archive model, configuration, and operation envelopes

use audit_relay_contracts::{AuditRecord, DataClassification};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ArchivalError {
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported compression algorithm: {0}")]
    UnsupportedCompression(String),

    #[error("cannot archive an empty record batch")]
    EmptyBatch,

    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("archive serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Serialization format recorded in archive metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// A single UTF-8 JSON array.
    Json,
    /// One JSON object per newline-separated line.
    Jsonl,
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Json => f.write_str("json"),
            ArchiveFormat::Jsonl => f.write_str("jsonl"),
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchivalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ArchiveFormat::Json),
            "jsonl" => Ok(ArchiveFormat::Jsonl),
            other => Err(ArchivalError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Compression algorithm recorded in archive metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    /// zlib-wrapped deflate.
    Deflate,
    None,
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::Gzip => f.write_str("gzip"),
            CompressionAlgorithm::Deflate => f.write_str("deflate"),
            CompressionAlgorithm::None => f.write_str("none"),
        }
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = ArchivalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gzip" => Ok(CompressionAlgorithm::Gzip),
            "deflate" => Ok(CompressionAlgorithm::Deflate),
            "none" => Ok(CompressionAlgorithm::None),
            other => Err(ArchivalError::UnsupportedCompression(other.to_string())),
        }
    }
}

/// Engine configuration, recorded verbatim into every archive's metadata
/// so retrieval never depends on the current system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub format: ArchiveFormat,
    pub compression: CompressionAlgorithm,
    /// 0 (store) through 9 (best); out-of-range values are clamped.
    pub compression_level: u32,
    pub verify_integrity: bool,
    pub batch_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            format: ArchiveFormat::Jsonl,
            compression: CompressionAlgorithm::Gzip,
            compression_level: 6,
            verify_integrity: true,
            batch_size: 1000,
        }
    }
}

/// Inclusive timestamp range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn intersects(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Count aggregates for one archived batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub by_classification: HashMap<String, usize>,
    pub by_action: HashMap<String, usize>,
}

impl BatchSummary {
    pub fn of(records: &[AuditRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            *summary
                .by_classification
                .entry(record.data_classification.to_string())
                .or_insert(0) += 1;
            *summary.by_action.entry(record.action.clone()).or_insert(0) += 1;
        }
        summary
    }
}

/// Immutable description of an archive's contents and provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub record_count: usize,
    pub original_size: usize,
    pub compressed_size: usize,
    /// compressed over original; 1.0 for identity compression.
    pub compression_ratio: f64,
    /// SHA-256 of the serialized records, hex.
    pub checksum_original: String,
    /// SHA-256 of the stored (compressed) payload, hex.
    pub checksum_compressed: String,
    pub retention_policy: String,
    pub data_classification: DataClassification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// The engine configuration in force at creation time. Retrieval
    /// reads format and compression from here, never from current config.
    pub config: ArchiveConfig,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

/// A stored archive. Immutable except for the retrieval statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub id: String,
    pub metadata: ArchiveMetadata,
    #[serde(with = "payload_base64")]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub retrieved_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retrieved_at: Option<DateTime<Utc>>,
}

/// Archive payloads serialize as base64 text so the JSON form is portable
/// across text-column backends.
mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Failed,
    Skipped,
}

/// Outcome envelope returned by archive creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveResult {
    pub archive_id: String,
    pub record_count: usize,
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: f64,
    pub checksum_original: String,
    pub checksum_compressed: String,
    pub verification_status: VerificationStatus,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Compliance retrieval request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,
    /// Tenant scope; retrieval only yields records of this organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_classifications: Option<Vec<DataClassification>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// One archive's contribution to a retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedArchive {
    pub archive_id: String,
    pub metadata: ArchiveMetadata,
    pub records: Vec<AuditRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub request_id: String,
    pub retrieved_at: DateTime<Utc>,
    pub record_count: usize,
    /// Total decompressed bytes across contributing archives.
    pub total_size: usize,
    pub retrieval_time_ms: u64,
    pub archives: Vec<RetrievedArchive>,
}

/// Secure-deletion criteria over the live audit log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_classifications: Option<Vec<DataClassification>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policies: Option<Vec<String>>,
    #[serde(default)]
    pub verify_deletion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteOutcome {
    Deleted,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionVerification {
    pub verified: bool,
    pub remaining_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureDeleteResult {
    pub records_deleted: usize,
    pub status: DeleteOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<DeletionVerification>,
}

/// Per-policy outcome of a retention run; failures never abort the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PolicyOutcome {
    Skipped { reason: String },
    Archived {
        result: ArchiveResult,
        records_archived: usize,
        records_deleted: u64,
    },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRunReport {
    pub policy_name: String,
    #[serde(flatten)]
    pub outcome: PolicyOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_archives: usize,
    pub verified: usize,
    pub corrupted: usize,
    pub corrupted_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub archives_deleted: usize,
    /// Sum of compressed sizes of deleted archives, bytes.
    pub space_freed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_ids: Vec<String>,
}
