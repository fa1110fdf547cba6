//! Periodic health monitor
//!
//! A single interval task that scans unhealthy destinations, promotes
//! timed-out open circuits to half-open, and emits structured warnings.

use crate::tracker::HealthTracker;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, warn};

pub struct HealthMonitor {
    tracker: Arc<HealthTracker>,
    handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl HealthMonitor {
    pub fn new(tracker: Arc<HealthTracker>) -> Self {
        Self {
            tracker,
            handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the scan loop. Starting an already-running monitor replaces
    /// the previous task.
    pub fn start(&self) {
        let tracker = Arc::clone(&self.tracker);
        let period_ms = tracker.thresholds().health_check_interval_ms;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(period_ms));
            // The first tick fires immediately; skip it so a fresh monitor
            // does not race startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Self::scan_once(&tracker).await;
            }
        });

        if let Some(previous) = self.handle.write().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending task. No scans execute after stop returns.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.write().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.read().is_some()
    }

    /// One reconciliation pass, also callable directly from tests and the
    /// CLI.
    pub async fn scan_once(tracker: &HealthTracker) {
        match tracker.list_unhealthy().await {
            Ok(unhealthy) => {
                for health in &unhealthy {
                    warn!(
                        destination_id = %health.destination_id,
                        status = %health.status,
                        circuit = %health.circuit_breaker_state,
                        consecutive_failures = health.consecutive_failures,
                        "destination unhealthy"
                    );
                }
            }
            Err(err) => {
                error!(%err, "health monitor failed to enumerate unhealthy destinations");
                return;
            }
        }

        match tracker.promote_timed_out_circuits().await {
            Ok(promoted) => {
                for destination_id in promoted {
                    warn!(%destination_id, "open circuit timed out, now half-open");
                }
            }
            Err(err) => {
                error!(%err, "health monitor failed to promote circuits");
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
