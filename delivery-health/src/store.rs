//! Storage ports for destination health, plus the in-memory implementation
//! used by tests and single-process deployments

use crate::types::{CircuitState, DestinationHealth, DestinationStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

/// Persistence port for per-destination health records.
///
/// `upsert` must be atomic per destination id; the tracker additionally
/// serializes all mutations for one destination, so implementations only
/// need last-write-wins semantics per row.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn find(&self, destination_id: &str) -> anyhow::Result<Option<DestinationHealth>>;

    async fn upsert(&self, health: &DestinationHealth) -> anyhow::Result<()>;

    /// Destinations the monitor loop should look at: anything not both
    /// healthy and closed-circuit. Disabled destinations are excluded;
    /// they stay down until explicitly re-enabled.
    async fn list_unhealthy(&self) -> anyhow::Result<Vec<DestinationHealth>>;
}

/// Port to the destination registry for enable/disable flips
#[async_trait]
pub trait DestinationDirectory: Send + Sync {
    async fn set_disabled(
        &self,
        destination_id: &str,
        disabled: bool,
        reason: &str,
        actor: &str,
    ) -> anyhow::Result<()>;
}

/// A disable/enable call observed by [`MemoryHealthStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableCall {
    pub destination_id: String,
    pub disabled: bool,
    pub reason: String,
    pub actor: String,
}

/// In-memory store implementing both ports
#[derive(Debug, Default)]
pub struct MemoryHealthStore {
    records: DashMap<String, DestinationHealth>,
    disable_calls: Mutex<Vec<DisableCall>>,
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable/enable flips seen so far, oldest first.
    pub fn disable_calls(&self) -> Vec<DisableCall> {
        self.disable_calls.lock().clone()
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    async fn find(&self, destination_id: &str) -> anyhow::Result<Option<DestinationHealth>> {
        Ok(self.records.get(destination_id).map(|r| r.clone()))
    }

    async fn upsert(&self, health: &DestinationHealth) -> anyhow::Result<()> {
        self.records
            .insert(health.destination_id.clone(), health.clone());
        Ok(())
    }

    async fn list_unhealthy(&self) -> anyhow::Result<Vec<DestinationHealth>> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                r.status != DestinationStatus::Disabled
                    && (r.status != DestinationStatus::Healthy
                        || r.circuit_breaker_state != CircuitState::Closed)
            })
            .map(|r| r.clone())
            .collect())
    }
}

#[async_trait]
impl DestinationDirectory for MemoryHealthStore {
    async fn set_disabled(
        &self,
        destination_id: &str,
        disabled: bool,
        reason: &str,
        actor: &str,
    ) -> anyhow::Result<()> {
        self.disable_calls.lock().push(DisableCall {
            destination_id: destination_id.to_string(),
            disabled,
            reason: reason.to_string(),
            actor: actor.to_string(),
        });
        Ok(())
    }
}
