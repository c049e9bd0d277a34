//! # Capacity Management
//!
//! The capacity ledger is the only writer of agent reservation
//! counters. A reservation is a single atomic compare-and-increment
//! in the store, so two concurrent routing decisions can never both
//! take an agent's last free slot. Releases floor at zero and stamp
//! the agent's capacity-freed timestamp, which the matcher uses as a
//! fairness tie-breaker.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::{AgentId, AgentStatus};
use crate::database::LeadStore;
use crate::error::Result;

/// Outcome of a conditional reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    /// The agent was already at max capacity
    NoCapacity,
}

/// Per-agent load snapshot for the heatmap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUtilization {
    pub agent_id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    pub current_capacity: u32,
    pub max_capacity: u32,
    /// current / max, 0.0 when max is zero
    pub utilization: f64,
}

/// Demand-vs-supply projection over a forward window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityForecast {
    pub window_hours: u32,
    /// Assignments per hour observed over the trailing day
    pub hourly_assignment_rate: f64,
    pub projected_demand: f64,
    /// Free slots across available agents right now
    pub free_capacity: u64,
    /// Demand exceeding free capacity, zero when supply covers it
    pub projected_shortfall: f64,
}

/// Serializes all capacity mutations through the store's atomic
/// guarded updates
pub struct CapacityLedger {
    store: Arc<dyn LeadStore>,
}

impl CapacityLedger {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    /// Conditionally take one unit of the agent's capacity.
    pub async fn try_reserve(&self, agent_id: &AgentId) -> Result<ReserveOutcome> {
        if self.store.try_reserve_capacity(agent_id).await? {
            debug!(agent = %agent_id, "capacity reserved");
            Ok(ReserveOutcome::Reserved)
        } else {
            Ok(ReserveOutcome::NoCapacity)
        }
    }

    /// Unconditional reservation for the forced manual path. Logged
    /// as an anomaly when it pushes the agent past max.
    pub async fn force_reserve(&self, agent_id: &AgentId) -> Result<()> {
        self.store.force_reserve_capacity(agent_id).await?;
        if let Some(agent) = self.store.get_agent(agent_id).await? {
            if agent.current_capacity > agent.max_capacity {
                warn!(
                    agent = %agent_id,
                    current = agent.current_capacity,
                    max = agent.max_capacity,
                    "forced reservation pushed agent over max capacity"
                );
            }
        }
        Ok(())
    }

    /// Return one unit of capacity; floors at zero in the store.
    pub async fn release(&self, agent_id: &AgentId) -> Result<()> {
        self.store.release_capacity(agent_id).await?;
        debug!(agent = %agent_id, "capacity released");
        Ok(())
    }

    /// Current load across all agents, busiest first
    pub async fn heatmap(&self) -> Result<Vec<AgentUtilization>> {
        let agents = self.store.list_agents().await?;
        let mut utilizations: Vec<AgentUtilization> = agents
            .into_iter()
            .map(|agent| AgentUtilization {
                utilization: agent.utilization(),
                agent_id: agent.id,
                name: agent.name,
                status: agent.status,
                current_capacity: agent.current_capacity,
                max_capacity: agent.max_capacity,
            })
            .collect();
        utilizations.sort_by(|a, b| {
            b.utilization
                .partial_cmp(&a.utilization)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(utilizations)
    }

    /// Project demand over the window from the trailing 24h assignment
    /// rate and compare it against free capacity.
    pub async fn forecast(&self, window_hours: u32) -> Result<CapacityForecast> {
        let since = Utc::now() - Duration::hours(24);
        let recent = self.store.assignments_created_since(since).await?;
        let hourly_assignment_rate = recent as f64 / 24.0;
        let projected_demand = hourly_assignment_rate * f64::from(window_hours);

        let free_capacity: u64 = self
            .store
            .list_available_agents()
            .await?
            .iter()
            .map(|agent| u64::from(agent.max_capacity.saturating_sub(agent.current_capacity)))
            .sum();

        Ok(CapacityForecast {
            window_hours,
            hourly_assignment_rate,
            projected_demand,
            free_capacity,
            projected_shortfall: (projected_demand - free_capacity as f64).max(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::database::MemoryStore;

    fn agent(id: &str, current: u32, max: u32) -> Agent {
        Agent {
            id: AgentId::from(id),
            name: id.to_string(),
            status: AgentStatus::Available,
            max_capacity: max,
            current_capacity: current,
            specializations: Vec::new(),
            rating: 4.0,
            conversion_rate: 0.2,
            avg_response_minutes: 5.0,
            city: None,
            state: None,
            last_released_at: None,
        }
    }

    #[tokio::test]
    async fn reserve_release_round_trip() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_agent(&agent("a1", 0, 1)).await.unwrap();
        let ledger = CapacityLedger::new(store.clone());

        assert_eq!(
            ledger.try_reserve(&AgentId::from("a1")).await.unwrap(),
            ReserveOutcome::Reserved
        );
        assert_eq!(
            ledger.try_reserve(&AgentId::from("a1")).await.unwrap(),
            ReserveOutcome::NoCapacity
        );
        ledger.release(&AgentId::from("a1")).await.unwrap();
        assert_eq!(
            ledger.try_reserve(&AgentId::from("a1")).await.unwrap(),
            ReserveOutcome::Reserved
        );
    }

    #[tokio::test]
    async fn heatmap_sorts_busiest_first() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_agent(&agent("idle", 1, 10)).await.unwrap();
        store.upsert_agent(&agent("busy", 9, 10)).await.unwrap();
        let ledger = CapacityLedger::new(store);

        let heatmap = ledger.heatmap().await.unwrap();
        assert_eq!(heatmap[0].agent_id, AgentId::from("busy"));
        assert!(heatmap[0].utilization > heatmap[1].utilization);
    }

    #[tokio::test]
    async fn forecast_reports_shortfall_when_demand_exceeds_supply() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_agent(&agent("a1", 1, 2)).await.unwrap();
        let ledger = CapacityLedger::new(store);

        let forecast = ledger.forecast(8).await.unwrap();
        assert_eq!(forecast.free_capacity, 1);
        // No assignments recorded, so no demand and no shortfall.
        assert_eq!(forecast.projected_shortfall, 0.0);
    }
}
