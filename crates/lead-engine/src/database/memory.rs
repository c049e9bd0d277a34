//! In-process store used as a test double

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::agent::{Agent, AgentId, AgentStatus, Specialization};
use crate::assignment::{Assignment, AssignmentStatus, RoutingExplanation};
use crate::error::{LeadEngineError, Result};
use crate::experiment::{Experiment, ExperimentStatus};
use crate::lead::{Lead, LeadId, LeadStatus, LeadTier};
use crate::queue::{QueueEntry, QueueStats, QueueType};

use super::store::LeadStore;

#[derive(Default)]
struct Inner {
    leads: HashMap<LeadId, Lead>,
    agents: HashMap<AgentId, Agent>,
    assignments: HashMap<String, Assignment>,
    queue: HashMap<LeadId, QueueEntry>,
    explanations: Vec<RoutingExplanation>,
    experiments: HashMap<String, Experiment>,
}

/// HashMap-backed [`LeadStore`]. Every operation runs under one
/// mutex, which makes the capacity compare-and-increment trivially
/// atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        self.inner.lock().leads.insert(lead.id.clone(), lead.clone());
        Ok(())
    }

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>> {
        Ok(self.inner.lock().leads.get(id).cloned())
    }

    async fn list_non_terminal_leads(&self) -> Result<Vec<Lead>> {
        Ok(self
            .inner
            .lock()
            .leads
            .values()
            .filter(|lead| !lead.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn update_lead_score(
        &self,
        id: &LeadId,
        score: f64,
        tier: LeadTier,
        sla_deadline: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let lead = inner
            .leads
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("lead", id.0.clone()))?;
        lead.quality_score = score;
        lead.tier = tier;
        lead.sla_deadline = sla_deadline;
        Ok(())
    }

    async fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<()> {
        let mut inner = self.inner.lock();
        let lead = inner
            .leads
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("lead", id.0.clone()))?;
        lead.status = status;
        Ok(())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.agents.get_mut(&agent.id) {
            Some(existing) => {
                // Preserve the live reservation counter on updates.
                let current = existing.current_capacity;
                let released = existing.last_released_at;
                *existing = agent.clone();
                existing.current_capacity = current;
                existing.last_released_at = released;
            }
            None => {
                inner.agents.insert(agent.id.clone(), agent.clone());
            }
        }
        Ok(())
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.inner.lock().agents.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.inner.lock().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(agents)
    }

    async fn list_available_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .inner
            .lock()
            .agents
            .values()
            .filter(|agent| agent.status == AgentStatus::Available)
            .cloned()
            .collect();
        agents.sort_by_key(|agent| agent.last_released_at);
        Ok(agents)
    }

    async fn update_agent_status(
        &self,
        id: &AgentId,
        status: AgentStatus,
        max_capacity: Option<u32>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("agent", id.0.clone()))?;
        agent.status = status;
        if let Some(max) = max_capacity {
            agent.max_capacity = max;
        }
        Ok(())
    }

    async fn replace_specializations(
        &self,
        id: &AgentId,
        specializations: Vec<Specialization>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("agent", id.0.clone()))?;
        agent.specializations = specializations;
        Ok(())
    }

    async fn try_reserve_capacity(&self, id: &AgentId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("agent", id.0.clone()))?;
        if agent.current_capacity < agent.max_capacity {
            agent.current_capacity += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn force_reserve_capacity(&self, id: &AgentId) -> Result<()> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("agent", id.0.clone()))?;
        agent.current_capacity += 1;
        Ok(())
    }

    async fn release_capacity(&self, id: &AgentId) -> Result<()> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("agent", id.0.clone()))?;
        agent.current_capacity = agent.current_capacity.saturating_sub(1);
        agent.last_released_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<()> {
        let mut inner = self.inner.lock();
        // Mirror the unique-index guarantee: one capacity-holding
        // assignment per lead.
        if let Some(existing) = inner.assignments.values().find(|a| {
            a.lead_id == assignment.lead_id && !a.status.is_terminal()
        }) {
            return Err(LeadEngineError::ConcurrencyConflict {
                agent_id: existing.agent_id.clone(),
            });
        }
        inner
            .assignments
            .insert(assignment.id.clone(), assignment.clone());
        Ok(())
    }

    async fn get_assignment(&self, id: &str) -> Result<Option<Assignment>> {
        Ok(self.inner.lock().assignments.get(id).cloned())
    }

    async fn get_active_assignment(&self, lead_id: &LeadId) -> Result<Option<Assignment>> {
        Ok(self
            .inner
            .lock()
            .assignments
            .values()
            .filter(|a| &a.lead_id == lead_id && !a.status.is_terminal())
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn update_assignment_status(&self, id: &str, status: AssignmentStatus) -> Result<()> {
        let mut inner = self.inner.lock();
        let assignment = inner
            .assignments
            .get_mut(id)
            .ok_or_else(|| LeadEngineError::not_found("assignment", id))?;
        assignment.status = status;
        Ok(())
    }

    async fn list_expired_pending_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>> {
        let mut expired: Vec<Assignment> = self
            .inner
            .lock()
            .assignments
            .values()
            .filter(|a| a.status == AssignmentStatus::Pending && a.expires_at <= now)
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.expires_at);
        Ok(expired)
    }

    async fn assignments_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .assignments
            .values()
            .filter(|a| a.created_at >= since)
            .count() as u64)
    }

    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.inner
            .lock()
            .queue
            .insert(entry.lead_id.clone(), entry.clone());
        Ok(())
    }

    async fn remove_queue_entry(&self, lead_id: &LeadId) -> Result<()> {
        self.inner.lock().queue.remove(lead_id);
        Ok(())
    }

    async fn get_queue_entry(&self, lead_id: &LeadId) -> Result<Option<QueueEntry>> {
        Ok(self.inner.lock().queue.get(lead_id).cloned())
    }

    async fn list_queue(&self, queue: QueueType, limit: usize) -> Result<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .inner
            .lock()
            .queue
            .values()
            .filter(|entry| entry.queue == queue)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>> {
        let inner = self.inner.lock();
        let now = Utc::now();
        Ok(QueueType::ALL
            .iter()
            .map(|&queue| {
                let entries: Vec<&QueueEntry> =
                    inner.queue.values().filter(|e| e.queue == queue).collect();
                let oldest_wait_secs = entries
                    .iter()
                    .map(|e| e.enqueued_at)
                    .min()
                    .map(|ts| (now - ts).num_seconds());
                QueueStats {
                    queue,
                    depth: entries.len(),
                    oldest_wait_secs,
                }
            })
            .collect())
    }

    async fn leads_approaching_sla(&self, threshold_minutes: i64) -> Result<Vec<Lead>> {
        let inner = self.inner.lock();
        let limit = Utc::now() + chrono::Duration::minutes(threshold_minutes);
        let mut leads: Vec<Lead> = inner
            .leads
            .values()
            .filter(|lead| {
                !lead.status.is_terminal()
                    && lead.sla_deadline <= limit
                    && !inner
                        .assignments
                        .values()
                        .any(|a| a.lead_id == lead.id && !a.status.is_terminal())
            })
            .cloned()
            .collect();
        leads.sort_by_key(|lead| lead.sla_deadline);
        Ok(leads)
    }

    async fn insert_explanation(&self, explanation: &RoutingExplanation) -> Result<()> {
        self.inner.lock().explanations.push(explanation.clone());
        Ok(())
    }

    async fn insert_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.inner
            .lock()
            .experiments
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>> {
        Ok(self.inner.lock().experiments.get(id).cloned())
    }

    async fn list_active_experiments(&self) -> Result<Vec<Experiment>> {
        let mut experiments: Vec<Experiment> = self
            .inner
            .lock()
            .experiments
            .values()
            .filter(|e| e.status == ExperimentStatus::Active)
            .cloned()
            .collect();
        experiments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(experiments)
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.experiments.contains_key(&experiment.id) {
            return Err(LeadEngineError::not_found("experiment", &*experiment.id));
        }
        inner
            .experiments
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;

    fn agent(id: &str, current: u32, max: u32) -> Agent {
        Agent {
            id: AgentId(id.to_string()),
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
    async fn reserve_stops_at_max_capacity() {
        let store = MemoryStore::new();
        store.upsert_agent(&agent("a1", 1, 2)).await.unwrap();

        assert!(store
            .try_reserve_capacity(&AgentId("a1".into()))
            .await
            .unwrap());
        assert!(!store
            .try_reserve_capacity(&AgentId("a1".into()))
            .await
            .unwrap());

        let stored = store
            .get_agent(&AgentId("a1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_capacity, 2);
    }

    #[tokio::test]
    async fn release_floors_at_zero_and_stamps_timestamp() {
        let store = MemoryStore::new();
        store.upsert_agent(&agent("a1", 0, 2)).await.unwrap();

        store.release_capacity(&AgentId("a1".into())).await.unwrap();
        let stored = store
            .get_agent(&AgentId("a1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_capacity, 0);
        assert!(stored.last_released_at.is_some());
    }

    #[tokio::test]
    async fn one_active_assignment_per_lead() {
        use crate::routing::RoutingStrategy;

        let store = MemoryStore::new();
        let first = Assignment::new(
            LeadId::from("l1"),
            AgentId::from("a1"),
            90.0,
            Vec::new(),
            RoutingStrategy::Greedy,
            Utc::now() + chrono::Duration::hours(24),
        );
        store.insert_assignment(&first).await.unwrap();

        let racing = Assignment::new(
            LeadId::from("l1"),
            AgentId::from("a2"),
            85.0,
            Vec::new(),
            RoutingStrategy::Greedy,
            Utc::now() + chrono::Duration::hours(24),
        );
        let err = store.insert_assignment(&racing).await.unwrap_err();
        assert!(matches!(
            err,
            LeadEngineError::ConcurrencyConflict { ref agent_id } if agent_id.0 == "a1"
        ));

        store
            .update_assignment_status(&first.id, AssignmentStatus::Rejected)
            .await
            .unwrap();
        store.insert_assignment(&racing).await.unwrap();
    }

    #[tokio::test]
    async fn upsert_preserves_reservation_counter() {
        let store = MemoryStore::new();
        store.upsert_agent(&agent("a1", 3, 5)).await.unwrap();
        store.upsert_agent(&agent("a1", 0, 8)).await.unwrap();

        let stored = store
            .get_agent(&AgentId("a1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_capacity, 3);
        assert_eq!(stored.max_capacity, 8);
    }
}
