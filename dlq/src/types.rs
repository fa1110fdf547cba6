//! Dead-letter event model, settings, and metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One delivery attempt from the retry history of a failed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

/// A quarantined audit event with its full failure provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// The original audit payload, kept opaque for forensic analysis.
    pub original_event: serde_json::Value,
    pub failure_reason: String,
    /// Always equals `retry_history.len()`.
    pub failure_count: u32,
    pub first_failure_time: DateTime<Utc>,
    pub last_failure_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_queue_name: Option<String>,
    /// Append-only, strictly ascending by attempt number.
    pub retry_history: Vec<RetryAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
}

/// Dead-letter queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqSettings {
    /// Total quarantined events at which alerts start firing.
    pub alert_threshold: usize,
    /// Minimum gap between alert rounds (ms).
    pub alert_cooldown_ms: i64,
    /// Age at which quarantined events are handed to the archival sink.
    pub archive_after_days: Option<i64>,
    /// Age at which quarantined events are removed outright.
    pub max_retention_days: i64,
    /// Worker poll period (ms).
    pub worker_poll_interval_ms: u64,
    /// Stored error stacks are truncated to this many bytes.
    pub max_error_stack_bytes: usize,
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self {
            alert_threshold: 10,
            alert_cooldown_ms: 300_000,
            archive_after_days: None,
            max_retention_days: 90,
            worker_poll_interval_ms: 60_000,
            max_error_stack_bytes: 8 * 1024,
        }
    }
}

/// Count of one failure reason across the quarantined set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReasonCount {
    pub reason: String,
    pub count: usize,
}

/// Aggregate view over every quarantined event, in any job state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqMetrics {
    pub total_events: usize,
    /// Events whose first failure fell on today's UTC calendar date.
    pub events_today: usize,
    pub oldest_event: Option<DateTime<Utc>>,
    pub newest_event: Option<DateTime<Utc>>,
    /// Top ten failure reasons by descending count.
    pub top_failure_reasons: Vec<FailureReasonCount>,
}
