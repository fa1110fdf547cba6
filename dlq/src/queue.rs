//! Durable FIFO queue port and the in-memory implementation
//!
//! Models the broker contract the DLQ consumes: at-least-once jobs with
//! per-job options, listable by state, movable to terminal states, and
//! forcibly removable. Arrival order matches enqueue order.

use crate::types::DeadLetterEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];
}

/// Per-job retention flags. Dead-letter jobs keep both off so completed
/// and failed jobs stay inspectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl JobOptions {
    /// The dead-letter default: nothing is dropped automatically.
    pub fn preserve_forensics() -> Self {
        Self {
            remove_on_complete: false,
            remove_on_fail: false,
        }
    }
}

/// A job as held by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub event: DeadLetterEvent,
    pub state: JobState,
    pub options: JobOptions,
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic enqueue sequence; FIFO order is ascending `seq`.
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Durable FIFO queue with at-least-once delivery
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Append a job; returns its id. Enqueue order defines processing
    /// order.
    async fn enqueue(&self, event: DeadLetterEvent, options: JobOptions) -> anyhow::Result<String>;

    async fn list(&self, state: JobState) -> anyhow::Result<Vec<QueuedJob>>;

    /// Pop the oldest waiting job, marking it active.
    async fn take_next_waiting(&self) -> anyhow::Result<Option<QueuedJob>>;

    /// Terminal completion, honoring `remove_on_complete`.
    async fn complete(&self, job_id: &str) -> anyhow::Result<()>;

    /// Terminal failure, honoring `remove_on_fail`.
    async fn fail(&self, job_id: &str, error: &str) -> anyhow::Result<()>;

    /// Unconditional removal, used when retention expires.
    async fn remove(&self, job_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct MemoryQueueInner {
    jobs: Vec<QueuedJob>,
    next_seq: u64,
}

/// In-process queue used by tests and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<MemoryQueueInner>,
    fail_enqueues: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent enqueue fail, to exercise the critical
    /// losing-events path.
    pub fn set_fail_enqueues(&self, fail: bool) {
        self.fail_enqueues.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn enqueue(&self, event: DeadLetterEvent, options: JobOptions) -> anyhow::Result<String> {
        if self.fail_enqueues.load(Ordering::SeqCst) {
            anyhow::bail!("queue backend unavailable");
        }
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = Uuid::new_v4().to_string();
        inner.jobs.push(QueuedJob {
            id: id.clone(),
            event,
            state: JobState::Waiting,
            options,
            enqueued_at: Utc::now(),
            seq,
            last_error: None,
        });
        Ok(id)
    }

    async fn list(&self, state: JobState) -> anyhow::Result<Vec<QueuedJob>> {
        let inner = self.inner.lock();
        let mut jobs: Vec<QueuedJob> = inner
            .jobs
            .iter()
            .filter(|j| j.state == state)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn take_next_waiting(&self) -> anyhow::Result<Option<QueuedJob>> {
        let mut inner = self.inner.lock();
        let next = inner
            .jobs
            .iter_mut()
            .filter(|j| j.state == JobState::Waiting)
            .min_by_key(|j| j.seq);
        Ok(next.map(|job| {
            job.state = JobState::Active;
            job.clone()
        }))
    }

    async fn complete(&self, job_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let Some(idx) = inner.jobs.iter().position(|j| j.id == job_id) else {
            anyhow::bail!("unknown job id: {job_id}");
        };
        if inner.jobs[idx].options.remove_on_complete {
            inner.jobs.remove(idx);
        } else {
            inner.jobs[idx].state = JobState::Completed;
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let Some(idx) = inner.jobs.iter().position(|j| j.id == job_id) else {
            anyhow::bail!("unknown job id: {job_id}");
        };
        if inner.jobs[idx].options.remove_on_fail {
            inner.jobs.remove(idx);
        } else {
            inner.jobs[idx].state = JobState::Failed;
            inner.jobs[idx].last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.jobs.retain(|j| j.id != job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(reason: &str) -> DeadLetterEvent {
        let now = Utc::now();
        DeadLetterEvent {
            original_event: serde_json::json!({"action": "login"}),
            failure_reason: reason.to_string(),
            failure_count: 0,
            first_failure_time: now,
            last_failure_time: now,
            original_job_id: None,
            original_queue_name: None,
            retry_history: Vec::new(),
            error_stack: None,
        }
    }

    #[tokio::test]
    async fn fifo_order_matches_enqueue_order() {
        let queue = MemoryQueue::new();
        queue
            .enqueue(event("first"), JobOptions::preserve_forensics())
            .await
            .unwrap();
        queue
            .enqueue(event("second"), JobOptions::preserve_forensics())
            .await
            .unwrap();

        let a = queue.take_next_waiting().await.unwrap().unwrap();
        let b = queue.take_next_waiting().await.unwrap().unwrap();
        assert_eq!(a.event.failure_reason, "first");
        assert_eq!(b.event.failure_reason, "second");
        assert!(queue.take_next_waiting().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_jobs_are_preserved_for_forensics() {
        let queue = MemoryQueue::new();
        let id = queue
            .enqueue(event("boom"), JobOptions::preserve_forensics())
            .await
            .unwrap();
        queue.take_next_waiting().await.unwrap();
        queue.complete(&id).await.unwrap();

        assert_eq!(queue.list(JobState::Completed).await.unwrap().len(), 1);
        assert_eq!(queue.len(), 1);

        queue.remove(&id).await.unwrap();
        assert!(queue.is_empty());
    }
}
