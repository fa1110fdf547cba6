//! Destination health model and threshold configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exponential moving average weight for response times.
const RESPONSE_TIME_EMA_ALPHA: f64 = 0.2;

/// Delivery health status of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// Terminal until an explicit re-enable.
    Disabled,
}

impl fmt::Display for DestinationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DestinationStatus::Healthy => "healthy",
            DestinationStatus::Degraded => "degraded",
            DestinationStatus::Unhealthy => "unhealthy",
            DestinationStatus::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Circuit-breaker states, independent of `DestinationStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

/// Thresholds driving status recomputation, circuit transitions, and the
/// monitor loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Consecutive failures before the status degrades.
    pub degraded_threshold: u32,
    /// Consecutive failures before the status turns unhealthy.
    pub unhealthy_threshold: u32,
    /// Consecutive failures before the circuit opens.
    pub circuit_breaker_threshold: u32,
    /// Consecutive failures before the destination is disabled outright.
    pub disable_threshold: u32,
    /// Success-rate floor (percent) once enough deliveries accumulated.
    pub min_success_rate: f64,
    /// Deliveries required before the success-rate floor applies.
    pub min_deliveries_for_rate: u64,
    /// How long an open circuit refuses deliveries (ms).
    pub circuit_breaker_timeout_ms: i64,
    /// Concurrent probe deliveries admitted while half-open.
    pub half_open_max_attempts: u32,
    /// Monitor loop period (ms).
    pub health_check_interval_ms: u64,
    /// Stored error messages are truncated to this many bytes.
    pub max_last_error_bytes: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_threshold: 3,
            unhealthy_threshold: 5,
            circuit_breaker_threshold: 5,
            disable_threshold: 10,
            min_success_rate: 95.0,
            min_deliveries_for_rate: 20,
            circuit_breaker_timeout_ms: 300_000,
            half_open_max_attempts: 3,
            health_check_interval_ms: 300_000,
            max_last_error_bytes: 1024,
        }
    }
}

/// Per-destination delivery health record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationHealth {
    pub destination_id: String,
    pub organization_id: String,
    pub status: DestinationStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_deliveries: u64,
    pub total_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub circuit_breaker_state: CircuitState,
    /// Set iff the circuit is open or half-open.
    pub circuit_breaker_opened_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub disabled_reason: Option<String>,
    pub average_response_time_ms: f64,
}

impl DestinationHealth {
    pub fn new(destination_id: impl Into<String>) -> Self {
        Self {
            destination_id: destination_id.into(),
            organization_id: String::new(),
            status: DestinationStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_deliveries: 0,
            total_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            last_error: None,
            circuit_breaker_state: CircuitState::Closed,
            circuit_breaker_opened_at: None,
            disabled_at: None,
            disabled_reason: None,
            average_response_time_ms: 0.0,
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = organization_id.into();
        self
    }

    /// Delivered-minus-failed over total, as a percentage. A fresh record
    /// reports 100.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_deliveries.max(1) as f64;
        (self.total_deliveries as f64 - self.total_failures as f64) / total * 100.0
    }

    /// Fold a new response-time sample into the moving average.
    pub fn observe_response_time(&mut self, response_time_ms: f64) {
        if self.total_deliveries <= 1 {
            self.average_response_time_ms = response_time_ms;
        } else {
            self.average_response_time_ms = RESPONSE_TIME_EMA_ALPHA * response_time_ms
                + (1.0 - RESPONSE_TIME_EMA_ALPHA) * self.average_response_time_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_guards_against_zero_deliveries() {
        let health = DestinationHealth::new("d1");
        assert_eq!(health.success_rate(), 100.0);
    }

    #[test]
    fn success_rate_counts_failures() {
        let mut health = DestinationHealth::new("d1");
        health.total_deliveries = 20;
        health.total_failures = 2;
        assert!((health.success_rate() - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn response_time_ema_weights_new_samples() {
        let mut health = DestinationHealth::new("d1");
        health.total_deliveries = 1;
        health.observe_response_time(100.0);
        assert_eq!(health.average_response_time_ms, 100.0);

        health.total_deliveries = 2;
        health.observe_response_time(200.0);
        // 0.2 * 200 + 0.8 * 100
        assert!((health.average_response_time_ms - 120.0).abs() < f64::EPSILON);
    }
}
