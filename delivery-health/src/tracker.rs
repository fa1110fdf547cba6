//! Health tracker: outcome recording, status recomputation, and the
//! circuit-breaker admission gate

use crate::store::{DestinationDirectory, HealthStore};
use crate::types::{CircuitState, DestinationHealth, DestinationStatus, HealthThresholds};
use audit_relay_contracts::Clock;
use chrono::Duration;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DISABLE_REASON: &str = "Exceeded failure threshold";
const DISABLE_ACTOR: &str = "health-monitor";

/// Tracks delivery outcomes per destination and decides admission.
///
/// All mutations for one destination are serialized through a keyed mutex,
/// so counter updates and circuit transitions can never observe each other
/// half-applied. Destinations are independent of each other.
pub struct HealthTracker {
    store: Arc<dyn HealthStore>,
    directory: Arc<dyn DestinationDirectory>,
    thresholds: HealthThresholds,
    clock: Arc<dyn Clock>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Probe deliveries currently admitted per half-open destination.
    /// Only read and written under that destination's lock.
    half_open_inflight: DashMap<String, u32>,
}

impl HealthTracker {
    pub fn new(
        store: Arc<dyn HealthStore>,
        directory: Arc<dyn DestinationDirectory>,
        thresholds: HealthThresholds,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            thresholds,
            clock,
            locks: DashMap::new(),
            half_open_inflight: DashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    fn lock_for(&self, destination_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(destination_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_or_new(&self, destination_id: &str) -> anyhow::Result<DestinationHealth> {
        Ok(self
            .store
            .find(destination_id)
            .await?
            .unwrap_or_else(|| DestinationHealth::new(destination_id)))
    }

    /// Record a successful delivery attempt.
    pub async fn record_success(
        &self,
        destination_id: &str,
        response_time_ms: f64,
    ) -> anyhow::Result<DestinationHealth> {
        let lock = self.lock_for(destination_id);
        let _guard = lock.lock().await;

        let mut health = self.load_or_new(destination_id).await?;
        health.last_success_at = Some(self.clock.now());
        health.consecutive_failures = 0;
        health.consecutive_successes += 1;
        health.total_deliveries += 1;
        health.observe_response_time(response_time_ms);

        if health.circuit_breaker_state == CircuitState::HalfOpen {
            health.circuit_breaker_state = CircuitState::Closed;
            health.circuit_breaker_opened_at = None;
            self.half_open_inflight.remove(destination_id);
            info!(
                destination_id,
                "circuit closed after successful half-open probe"
            );
        }

        self.recompute_status(&mut health);
        self.store.upsert(&health).await?;
        Ok(health)
    }

    /// Record a failed delivery attempt. Crossing the disable threshold
    /// disables the destination through the directory port.
    pub async fn record_failure(
        &self,
        destination_id: &str,
        error_message: &str,
    ) -> anyhow::Result<DestinationHealth> {
        let lock = self.lock_for(destination_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut health = self.load_or_new(destination_id).await?;
        health.last_failure_at = Some(now);
        health.last_error = Some(truncate_to_boundary(
            error_message,
            self.thresholds.max_last_error_bytes,
        ));
        health.consecutive_successes = 0;
        health.consecutive_failures += 1;
        health.total_failures += 1;
        health.total_deliveries += 1;

        match health.circuit_breaker_state {
            CircuitState::HalfOpen => {
                health.circuit_breaker_state = CircuitState::Open;
                health.circuit_breaker_opened_at = Some(now);
                self.half_open_inflight.remove(destination_id);
                warn!(destination_id, "half-open probe failed, circuit reopened");
            }
            CircuitState::Closed
                if health.consecutive_failures >= self.thresholds.circuit_breaker_threshold =>
            {
                health.circuit_breaker_state = CircuitState::Open;
                health.circuit_breaker_opened_at = Some(now);
                warn!(
                    destination_id,
                    consecutive_failures = health.consecutive_failures,
                    "circuit opened"
                );
            }
            _ => {}
        }

        self.recompute_status(&mut health);

        if health.status != DestinationStatus::Disabled
            && health.consecutive_failures >= self.thresholds.disable_threshold
        {
            health.status = DestinationStatus::Disabled;
            health.disabled_at = Some(now);
            health.disabled_reason = Some(DISABLE_REASON.to_string());
            self.store.upsert(&health).await?;
            self.directory
                .set_disabled(destination_id, true, DISABLE_REASON, DISABLE_ACTOR)
                .await?;
            warn!(
                destination_id,
                consecutive_failures = health.consecutive_failures,
                "destination disabled"
            );
            return Ok(health);
        }

        self.store.upsert(&health).await?;
        Ok(health)
    }

    /// Admission decision for the next delivery attempt.
    ///
    /// Fail-open: storage errors log a warning and allow delivery; audit
    /// ingress is never blocked on telemetry. A disabled destination is
    /// the only unconditional deny.
    pub async fn should_allow_delivery(&self, destination_id: &str) -> bool {
        let lock = self.lock_for(destination_id);
        let _guard = lock.lock().await;

        let health = match self.store.find(destination_id).await {
            Ok(Some(health)) => health,
            Ok(None) => return true,
            Err(error) => {
                warn!(destination_id, %error, "health lookup failed, allowing delivery");
                return true;
            }
        };

        if health.status == DestinationStatus::Disabled {
            return false;
        }

        match health.circuit_breaker_state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if !self.open_timeout_elapsed(&health) {
                    return false;
                }
                let mut promoted = health;
                promoted.circuit_breaker_state = CircuitState::HalfOpen;
                if let Err(error) = self.store.upsert(&promoted).await {
                    warn!(destination_id, %error, "failed to persist half-open transition, allowing delivery");
                    return true;
                }
                // The admitted request is the first probe.
                self.half_open_inflight.insert(destination_id.to_string(), 1);
                info!(destination_id, "circuit half-open, admitting probe");
                true
            }
            CircuitState::HalfOpen => {
                let mut inflight = self
                    .half_open_inflight
                    .entry(destination_id.to_string())
                    .or_insert(0);
                if *inflight < self.thresholds.half_open_max_attempts {
                    *inflight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Explicit circuit-state write, idempotent. Closing clears the
    /// opened-at marker; opening stamps it if absent.
    pub async fn update_circuit_breaker_state(
        &self,
        destination_id: &str,
        state: CircuitState,
        opened_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> anyhow::Result<DestinationHealth> {
        let lock = self.lock_for(destination_id);
        let _guard = lock.lock().await;

        let mut health = self.load_or_new(destination_id).await?;
        health.circuit_breaker_state = state;
        health.circuit_breaker_opened_at = match state {
            CircuitState::Closed => None,
            _ => opened_at
                .or(health.circuit_breaker_opened_at)
                .or_else(|| Some(self.clock.now())),
        };
        if state != CircuitState::HalfOpen {
            self.half_open_inflight.remove(destination_id);
        }
        self.store.upsert(&health).await?;
        Ok(health)
    }

    pub async fn disable_destination(
        &self,
        destination_id: &str,
        reason: &str,
        actor: &str,
    ) -> anyhow::Result<()> {
        let lock = self.lock_for(destination_id);
        let _guard = lock.lock().await;

        let mut health = self.load_or_new(destination_id).await?;
        health.status = DestinationStatus::Disabled;
        health.disabled_at = Some(self.clock.now());
        health.disabled_reason = Some(reason.to_string());
        self.store.upsert(&health).await?;
        self.directory
            .set_disabled(destination_id, true, reason, actor)
            .await?;
        Ok(())
    }

    /// Clear the terminal disabled state and return the destination to
    /// service with a closed circuit and zeroed failure streak.
    pub async fn enable_destination(
        &self,
        destination_id: &str,
        actor: &str,
    ) -> anyhow::Result<()> {
        let lock = self.lock_for(destination_id);
        let _guard = lock.lock().await;

        if let Some(mut health) = self.store.find(destination_id).await? {
            health.status = DestinationStatus::Healthy;
            health.disabled_at = None;
            health.disabled_reason = None;
            health.consecutive_failures = 0;
            health.circuit_breaker_state = CircuitState::Closed;
            health.circuit_breaker_opened_at = None;
            self.recompute_status(&mut health);
            self.store.upsert(&health).await?;
        }
        self.half_open_inflight.remove(destination_id);
        self.directory
            .set_disabled(destination_id, false, "Re-enabled by operator", actor)
            .await?;
        Ok(())
    }

    pub async fn get_health(
        &self,
        destination_id: &str,
    ) -> anyhow::Result<Option<DestinationHealth>> {
        self.store.find(destination_id).await
    }

    pub async fn list_unhealthy(&self) -> anyhow::Result<Vec<DestinationHealth>> {
        self.store.list_unhealthy().await
    }

    /// Promote every open circuit whose timeout elapsed to half-open.
    /// Used by the monitor loop; returns the promoted destination ids.
    pub async fn promote_timed_out_circuits(&self) -> anyhow::Result<Vec<String>> {
        let candidates = self.store.list_unhealthy().await?;
        let mut promoted = Vec::new();

        for candidate in candidates {
            if candidate.circuit_breaker_state != CircuitState::Open {
                continue;
            }
            let lock = self.lock_for(&candidate.destination_id);
            let _guard = lock.lock().await;

            // Re-read under the lock; a delivery worker may have raced us.
            let Some(mut current) = self.store.find(&candidate.destination_id).await? else {
                continue;
            };
            if current.status == DestinationStatus::Disabled
                || current.circuit_breaker_state != CircuitState::Open
                || !self.open_timeout_elapsed(&current)
            {
                continue;
            }
            current.circuit_breaker_state = CircuitState::HalfOpen;
            self.store.upsert(&current).await?;
            self.half_open_inflight
                .insert(current.destination_id.clone(), 0);
            promoted.push(current.destination_id);
        }

        Ok(promoted)
    }

    fn open_timeout_elapsed(&self, health: &DestinationHealth) -> bool {
        let timeout = Duration::milliseconds(self.thresholds.circuit_breaker_timeout_ms);
        match health.circuit_breaker_opened_at {
            Some(opened_at) => self.clock.now() - opened_at >= timeout,
            // An open circuit without a timestamp cannot be aged; treat it
            // as expired rather than wedging the destination shut.
            None => true,
        }
    }

    fn recompute_status(&self, health: &mut DestinationHealth) {
        if health.status == DestinationStatus::Disabled {
            return;
        }
        health.status = if health.consecutive_failures >= self.thresholds.unhealthy_threshold {
            DestinationStatus::Unhealthy
        } else if health.consecutive_failures >= self.thresholds.degraded_threshold {
            DestinationStatus::Degraded
        } else if health.success_rate() < self.thresholds.min_success_rate
            && health.total_deliveries >= self.thresholds.min_deliveries_for_rate
        {
            DestinationStatus::Degraded
        } else {
            DestinationStatus::Healthy
        };
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
fn truncate_to_boundary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
