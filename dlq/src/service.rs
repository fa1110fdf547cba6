//! Dead-letter service: quarantine intake, metrics, alerting, and the
//! single-consumer aging worker

use crate::queue::{DurableQueue, JobOptions, JobState, QueuedJob};
use crate::types::{DeadLetterEvent, DlqMetrics, DlqSettings, FailureReasonCount, RetryAttempt};
use async_trait::async_trait;
use audit_relay_contracts::Clock;
use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    /// The dead-letter enqueue itself failed: audit events are being
    /// lost. This is the only panic-worthy condition in the core and the
    /// caller must escalate.
    #[error("critical dead-letter enqueue failure, audit events are being lost: {source}")]
    CriticalFailure {
        #[source]
        source: anyhow::Error,
    },

    #[error("retry history is not strictly ascending by attempt")]
    InvalidRetryHistory,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Receives events that aged past the archive window.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn archive(&self, event: &DeadLetterEvent) -> anyhow::Result<()>;
}

type AlertCallback = Arc<dyn Fn(&DlqMetrics) -> anyhow::Result<()> + Send + Sync>;
type CallbackRegistry = RwLock<Vec<(u64, AlertCallback)>>;

/// Deregistration handle returned by [`DeadLetterService::on_alert`]
pub struct AlertSubscription {
    id: u64,
    registry: Weak<CallbackRegistry>,
}

impl AlertSubscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.write().retain(|(id, _)| *id != self.id);
        }
    }
}

/// The dead-letter queue service
pub struct DeadLetterService {
    queue: Arc<dyn DurableQueue>,
    settings: DlqSettings,
    clock: Arc<dyn Clock>,
    callbacks: Arc<CallbackRegistry>,
    next_callback_id: AtomicU64,
    last_alert_at: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
    worker_handle: RwLock<Option<JoinHandle<()>>>,
}

impl DeadLetterService {
    pub fn new(queue: Arc<dyn DurableQueue>, settings: DlqSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            settings,
            clock,
            callbacks: Arc::new(RwLock::new(Vec::new())),
            next_callback_id: AtomicU64::new(0),
            last_alert_at: Mutex::new(None),
            worker_handle: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &DlqSettings {
        &self.settings
    }

    /// Quarantine an event that exhausted its delivery retries.
    ///
    /// The failure window is reconstructed from the retry history: the
    /// first attempt timestamp (or now, if the history is empty) opens
    /// it, the current instant closes it.
    pub async fn add_failed_event(
        &self,
        original_event: serde_json::Value,
        error: &anyhow::Error,
        original_job_id: Option<String>,
        original_queue_name: Option<String>,
        retry_history: Vec<RetryAttempt>,
    ) -> Result<DeadLetterEvent, DlqError> {
        if !retry_history.windows(2).all(|w| w[0].attempt < w[1].attempt) {
            return Err(DlqError::InvalidRetryHistory);
        }

        let now = self.clock.now();
        let first_failure_time = retry_history.first().map(|a| a.timestamp).unwrap_or(now);
        let event = DeadLetterEvent {
            original_event,
            failure_reason: error.to_string(),
            failure_count: retry_history.len() as u32,
            first_failure_time,
            last_failure_time: now,
            original_job_id,
            original_queue_name,
            retry_history,
            error_stack: Some(truncate_bytes(
                &format!("{error:?}"),
                self.settings.max_error_stack_bytes,
            )),
        };

        match self
            .queue
            .enqueue(event.clone(), JobOptions::preserve_forensics())
            .await
        {
            Ok(job_id) => {
                info!(
                    job_id,
                    failure_reason = %event.failure_reason,
                    failure_count = event.failure_count,
                    "event quarantined in dead-letter queue"
                );
            }
            Err(source) => {
                error!(
                    %source,
                    failure_reason = %event.failure_reason,
                    "CRITICAL: dead-letter enqueue failed, audit events are being lost"
                );
                return Err(DlqError::CriticalFailure { source });
            }
        }

        self.check_alerts().await;
        Ok(event)
    }

    /// Aggregate metrics over every job state.
    pub async fn metrics(&self) -> anyhow::Result<DlqMetrics> {
        let mut jobs = Vec::new();
        for state in JobState::ALL {
            jobs.extend(self.queue.list(state).await?);
        }

        let today = self.clock.now().date_naive();
        let events_today = jobs
            .iter()
            .filter(|j| j.event.first_failure_time.date_naive() == today)
            .count();

        let mut reason_counts: HashMap<&str, usize> = HashMap::new();
        for job in &jobs {
            *reason_counts
                .entry(job.event.failure_reason.as_str())
                .or_insert(0) += 1;
        }
        let mut top_failure_reasons: Vec<FailureReasonCount> = reason_counts
            .into_iter()
            .map(|(reason, count)| FailureReasonCount {
                reason: reason.to_string(),
                count,
            })
            .collect();
        top_failure_reasons.sort_by(|a, b| b.count.cmp(&a.count).then(a.reason.cmp(&b.reason)));
        top_failure_reasons.truncate(10);

        Ok(DlqMetrics {
            total_events: jobs.len(),
            events_today,
            oldest_event: jobs.iter().map(|j| j.event.first_failure_time).min(),
            newest_event: jobs.iter().map(|j| j.event.last_failure_time).max(),
            top_failure_reasons,
        })
    }

    /// Register an alert callback. Callbacks run sequentially in
    /// registration order; errors and panics are logged and contained.
    pub fn on_alert<F>(&self, callback: F) -> AlertSubscription
    where
        F: Fn(&DlqMetrics) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.write().push((id, Arc::new(callback)));
        AlertSubscription {
            id,
            registry: Arc::downgrade(&self.callbacks),
        }
    }

    async fn check_alerts(&self) {
        let metrics = match self.metrics().await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(%err, "skipping alert check, metrics unavailable");
                return;
            }
        };
        if metrics.total_events < self.settings.alert_threshold {
            return;
        }

        {
            let mut last_alert = self.last_alert_at.lock();
            let now = self.clock.now();
            if let Some(previous) = *last_alert {
                if now - previous < Duration::milliseconds(self.settings.alert_cooldown_ms) {
                    return;
                }
            }
            *last_alert = Some(now);
        }

        warn!(
            total_events = metrics.total_events,
            threshold = self.settings.alert_threshold,
            "dead-letter queue above alert threshold"
        );

        let callbacks: Vec<(u64, AlertCallback)> = self.callbacks.read().clone();
        for (id, callback) in callbacks {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(&metrics))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(callback = id, %err, "alert callback returned error"),
                Err(_) => warn!(callback = id, "alert callback panicked"),
            }
        }
    }

    /// Start the single aging worker (concurrency 1). Each pass drains
    /// waiting jobs, then sweeps preserved jobs whose age crossed the
    /// archive or retention windows.
    pub fn start_worker(self: Arc<Self>, sink: Arc<dyn ArchiveSink>) {
        let service = Arc::clone(&self);
        let poll_ms = self.settings.worker_poll_interval_ms;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_millis(poll_ms));
            loop {
                ticker.tick().await;
                if let Err(err) = service.process_pass(sink.as_ref()).await {
                    error!(%err, "dead-letter worker pass failed");
                }
            }
        });

        if let Some(previous) = self.worker_handle.write().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_worker(&self) {
        if let Some(handle) = self.worker_handle.write().take() {
            handle.abort();
        }
    }

    /// One full worker pass; exposed for tests and CLI use.
    pub async fn process_pass(&self, sink: &dyn ArchiveSink) -> anyhow::Result<()> {
        while let Some(job) = self.queue.take_next_waiting().await? {
            self.age_job(&job, sink, true).await?;
        }

        for state in [JobState::Completed, JobState::Failed] {
            for job in self.queue.list(state).await? {
                self.age_job(&job, sink, false).await?;
            }
        }
        Ok(())
    }

    async fn age_job(
        &self,
        job: &QueuedJob,
        sink: &dyn ArchiveSink,
        freshly_taken: bool,
    ) -> anyhow::Result<()> {
        let age_ms = (self.clock.now() - job.event.first_failure_time).num_milliseconds();
        let age_days = age_ms as f64 / 86_400_000.0;

        let past_archive_window = self
            .settings
            .archive_after_days
            .is_some_and(|days| age_days > days as f64);
        let past_retention = age_days > self.settings.max_retention_days as f64;

        // Archive eligibility is checked before retention: an event past
        // both windows must be handed off before its job can be removed.
        // Removal without a hand-off only happens when no archive window
        // is configured.
        let action = if past_archive_window {
            match sink.archive(&job.event).await {
                Ok(()) => {
                    // The archive is now the durable record; quarantine ends.
                    self.queue.remove(&job.id).await?;
                    "archived"
                }
                Err(err) => {
                    warn!(job_id = %job.id, %err, "archive hand-off failed, keeping event quarantined");
                    if freshly_taken {
                        self.queue.fail(&job.id, &err.to_string()).await?;
                    }
                    "archive-failed"
                }
            }
        } else if past_retention {
            self.queue.remove(&job.id).await?;
            "removed"
        } else {
            if freshly_taken {
                self.queue.complete(&job.id).await?;
            }
            "retained"
        };

        info!(
            job_id = %job.id,
            action,
            failure_reason = %job.event.failure_reason,
            failure_count = job.event.failure_count,
            age_days = format!("{age_days:.2}"),
            "processed dead-letter event"
        );
        Ok(())
    }
}

impl Drop for DeadLetterService {
    fn drop(&mut self) {
        if let Some(handle) = self.worker_handle.write().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DeadLetterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterService")
            .field("settings", &self.settings)
            .finish()
    }
}

fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use audit_relay_contracts::ManualClock;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        archived: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                archived: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ArchiveSink for CountingSink {
        async fn archive(&self, _event: &DeadLetterEvent) -> anyhow::Result<()> {
            self.archived.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service_with(
        settings: DlqSettings,
        clock: ManualClock,
    ) -> (Arc<DeadLetterService>, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        let service = Arc::new(DeadLetterService::new(
            queue.clone(),
            settings,
            Arc::new(clock),
        ));
        (service, queue)
    }

    fn payload() -> serde_json::Value {
        serde_json::json!({"action": "document.read", "principalId": "u1"})
    }

    #[tokio::test]
    async fn failure_window_comes_from_retry_history() {
        let clock = ManualClock::starting_at(Utc::now());
        let (service, _) = service_with(DlqSettings::default(), clock.clone());

        let t0 = clock.now() - Duration::hours(2);
        let history = vec![
            RetryAttempt {
                attempt: 1,
                timestamp: t0,
                error: "timeout".to_string(),
            },
            RetryAttempt {
                attempt: 2,
                timestamp: t0 + Duration::minutes(5),
                error: "timeout".to_string(),
            },
        ];

        let event = service
            .add_failed_event(
                payload(),
                &anyhow::anyhow!("timeout"),
                Some("job-9".to_string()),
                Some("delivery".to_string()),
                history,
            )
            .await
            .unwrap();

        assert_eq!(event.first_failure_time, t0);
        assert_eq!(event.last_failure_time, clock.now());
        assert_eq!(event.failure_count, 2);
    }

    #[tokio::test]
    async fn out_of_order_retry_history_is_rejected() {
        let clock = ManualClock::starting_at(Utc::now());
        let (service, _) = service_with(DlqSettings::default(), clock.clone());
        let now = clock.now();

        let history = vec![
            RetryAttempt {
                attempt: 2,
                timestamp: now,
                error: "x".to_string(),
            },
            RetryAttempt {
                attempt: 1,
                timestamp: now,
                error: "x".to_string(),
            },
        ];
        let err = service
            .add_failed_event(payload(), &anyhow::anyhow!("x"), None, None, history)
            .await
            .unwrap_err();
        assert!(matches!(err, DlqError::InvalidRetryHistory));
    }

    #[tokio::test]
    async fn enqueue_failure_is_critical() {
        let clock = ManualClock::starting_at(Utc::now());
        let (service, queue) = service_with(DlqSettings::default(), clock);

        queue.set_fail_enqueues(true);
        let err = service
            .add_failed_event(payload(), &anyhow::anyhow!("boom"), None, None, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DlqError::CriticalFailure { .. }));
    }

    #[tokio::test]
    async fn alert_fires_at_threshold_and_respects_cooldown() {
        let clock = ManualClock::starting_at(Utc::now());
        let settings = DlqSettings {
            alert_threshold: 2,
            ..Default::default()
        };
        let (service, _) = service_with(settings, clock.clone());

        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = Arc::clone(&fired);
        let _subscription = service.on_alert(move |metrics| {
            fired_clone.lock().push(metrics.total_events);
            Ok(())
        });

        let err = anyhow::anyhow!("timeout");
        service
            .add_failed_event(payload(), &err, None, None, Vec::new())
            .await
            .unwrap();
        assert!(fired.lock().is_empty());

        service
            .add_failed_event(payload(), &err, None, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(fired.lock().clone(), vec![2]);

        // Third event inside the cooldown window: no second alert.
        service
            .add_failed_event(payload(), &err, None, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(fired.lock().len(), 1);

        clock.advance(Duration::milliseconds(300_000));
        service
            .add_failed_event(payload(), &err, None, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(fired.lock().clone(), vec![2, 4]);
    }

    #[tokio::test]
    async fn callback_panics_are_contained() {
        let clock = ManualClock::starting_at(Utc::now());
        let settings = DlqSettings {
            alert_threshold: 1,
            ..Default::default()
        };
        let (service, _) = service_with(settings, clock);

        let reached = Arc::new(AtomicUsize::new(0));
        let reached_clone = Arc::clone(&reached);
        let _panicking = service.on_alert(|_| panic!("bad callback"));
        let _erroring = service.on_alert(|_| anyhow::bail!("callback error"));
        let _counting = service.on_alert(move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        service
            .add_failed_event(payload(), &anyhow::anyhow!("x"), None, None, Vec::new())
            .await
            .unwrap();
        // Later callbacks still ran after the panic and the error.
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribed_callbacks_stop_firing() {
        let clock = ManualClock::starting_at(Utc::now());
        let settings = DlqSettings {
            alert_threshold: 1,
            alert_cooldown_ms: 0,
            ..Default::default()
        };
        let (service, _) = service_with(settings, clock);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let subscription = service.on_alert(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        service
            .add_failed_event(payload(), &anyhow::anyhow!("x"), None, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        service
            .add_failed_event(payload(), &anyhow::anyhow!("x"), None, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn metrics_aggregate_reasons_and_dates() {
        let clock = ManualClock::starting_at(Utc::now());
        let (service, _) = service_with(DlqSettings::default(), clock.clone());

        let timeout = anyhow::anyhow!("timeout");
        let refused = anyhow::anyhow!("connection refused");
        for _ in 0..3 {
            service
                .add_failed_event(payload(), &timeout, None, None, Vec::new())
                .await
                .unwrap();
        }
        service
            .add_failed_event(payload(), &refused, None, None, Vec::new())
            .await
            .unwrap();

        let metrics = service.metrics().await.unwrap();
        assert_eq!(metrics.total_events, 4);
        assert_eq!(metrics.events_today, 4);
        assert_eq!(metrics.top_failure_reasons[0].reason, "timeout");
        assert_eq!(metrics.top_failure_reasons[0].count, 3);
        assert_eq!(metrics.top_failure_reasons[1].count, 1);
        assert!(metrics.oldest_event.is_some());
        assert!(metrics.newest_event.is_some());
    }

    #[tokio::test]
    async fn started_worker_drains_the_queue_and_stop_cancels() {
        let clock = ManualClock::starting_at(Utc::now());
        let settings = DlqSettings {
            archive_after_days: Some(30),
            ..Default::default()
        };
        let (service, queue) = service_with(settings, clock.clone());
        let sink = CountingSink::new();

        let history = vec![RetryAttempt {
            attempt: 1,
            timestamp: clock.now() - Duration::days(45),
            error: "old".to_string(),
        }];
        service
            .add_failed_event(payload(), &anyhow::anyhow!("old"), None, None, history)
            .await
            .unwrap();

        Arc::clone(&service).start_worker(sink.clone());
        // The first worker tick fires immediately.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(sink.archived.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
        service.stop_worker();
    }

    #[tokio::test]
    async fn worker_retains_young_and_archives_aged_events() {
        let clock = ManualClock::starting_at(Utc::now());
        let settings = DlqSettings {
            archive_after_days: Some(30),
            max_retention_days: 90,
            ..Default::default()
        };
        let (service, queue) = service_with(settings, clock.clone());
        let sink = CountingSink::new();

        let now = clock.now();
        // Young event: retained. Middle-aged: archived. Ancient: past both
        // windows, so it is archived before its job is removed.
        for (days_old, reason) in [(1, "young"), (45, "middling"), (120, "ancient")] {
            let history = vec![RetryAttempt {
                attempt: 1,
                timestamp: now - Duration::days(days_old),
                error: reason.to_string(),
            }];
            service
                .add_failed_event(payload(), &anyhow::anyhow!("{reason}"), None, None, history)
                .await
                .unwrap();
        }

        service.process_pass(sink.as_ref()).await.unwrap();

        assert_eq!(sink.archived.load(Ordering::SeqCst), 2);
        // Young event survives as a preserved completed job.
        let completed = queue.list(JobState::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].event.failure_reason, "young");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn retention_removal_without_archive_window_skips_hand_off() {
        let clock = ManualClock::starting_at(Utc::now());
        let settings = DlqSettings {
            archive_after_days: None,
            max_retention_days: 90,
            ..Default::default()
        };
        let (service, queue) = service_with(settings, clock.clone());
        let sink = CountingSink::new();

        let history = vec![RetryAttempt {
            attempt: 1,
            timestamp: clock.now() - Duration::days(120),
            error: "ancient".to_string(),
        }];
        service
            .add_failed_event(payload(), &anyhow::anyhow!("ancient"), None, None, history)
            .await
            .unwrap();

        service.process_pass(sink.as_ref()).await.unwrap();

        assert_eq!(sink.archived.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failed_hand_off_keeps_over_retention_events_quarantined() {
        struct FailingSink;

        #[async_trait]
        impl ArchiveSink for FailingSink {
            async fn archive(&self, _event: &DeadLetterEvent) -> anyhow::Result<()> {
                anyhow::bail!("archive store unavailable")
            }
        }

        let clock = ManualClock::starting_at(Utc::now());
        let settings = DlqSettings {
            archive_after_days: Some(30),
            max_retention_days: 90,
            ..Default::default()
        };
        let (service, queue) = service_with(settings, clock.clone());

        // Past both windows; the hand-off fails, so the event must not be
        // removed.
        let history = vec![RetryAttempt {
            attempt: 1,
            timestamp: clock.now() - Duration::days(120),
            error: "ancient".to_string(),
        }];
        service
            .add_failed_event(payload(), &anyhow::anyhow!("ancient"), None, None, history)
            .await
            .unwrap();

        service.process_pass(&FailingSink).await.unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.list(JobState::Failed).await.unwrap().len(), 1);
    }
}
