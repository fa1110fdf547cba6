//! Dead-letter queue
//!
//! Quarantines audit events that exhausted delivery retries, aggregates
//! metrics over the quarantined set, raises threshold alerts with a
//! cooldown, and ages events out to the archival engine or to removal
//! under the retention settings.
//!
//! The one loud failure in this crate is [`DlqError::CriticalFailure`]:
//! if the dead-letter enqueue itself fails, the system is losing audit
//! events and the caller must escalate.

pub mod queue;
pub mod service;
pub mod types;

pub use queue::{DurableQueue, JobOptions, JobState, MemoryQueue, QueuedJob};
pub use service::{AlertSubscription, ArchiveSink, DeadLetterService, DlqError};
pub use types::{DeadLetterEvent, DlqMetrics, DlqSettings, FailureReasonCount, RetryAttempt};
