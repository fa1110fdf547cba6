//! Archival engine
//!
//! Serializes, compresses, and checksums batches of audit records into
//! immutable archives; drives retention-policy archival of the live
//! store; serves compliance retrievals; performs verified secure
//! deletion; validates archive integrity; and cleans up aged archives.
//!
//! The engine holds storage ports, never a concrete backend. Postgres
//! implementations live in `audit-relay-database`; in-memory
//! implementations ship here for tests and single-process use.

pub mod codec;
pub mod dlq_sink;
pub mod engine;
pub mod store;
pub mod types;

pub use dlq_sink::DeadLetterArchiveSink;
pub use engine::{ArchivalEngine, ArchiveStats, CreateArchiveRequest, PolicyPreview};
pub use store::{
    ArchiveQuery, ArchiveStore, AuditLogStore, MemoryArchiveStore, MemoryAuditLogStore,
    MemoryPolicyStore, RecordQuery, RetentionPolicyStore,
};
pub use types::{
    Archive, ArchiveConfig, ArchiveFormat, ArchiveMetadata, ArchiveResult, ArchivalError,
    BatchSummary, CleanupReport, CompressionAlgorithm, DateRange, DeleteCriteria, DeleteOutcome,
    DeletionVerification, PolicyOutcome, PolicyRunReport, RetrievalRequest, RetrievalResult,
    RetrievedArchive, SecureDeleteResult, ValidationReport, VerificationStatus,
};
