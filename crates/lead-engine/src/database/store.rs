//! Repository trait and retry helpers

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::agent::{Agent, AgentId, AgentStatus, Specialization};
use crate::assignment::{Assignment, AssignmentStatus, RoutingExplanation};
use crate::error::{LeadEngineError, Result};
use crate::experiment::Experiment;
use crate::lead::{Lead, LeadId, LeadStatus, LeadTier};
use crate::queue::{QueueEntry, QueueStats, QueueType};

/// Abstracted persistence for the whole engine (repository pattern)
#[async_trait]
pub trait LeadStore: Send + Sync {
    // --- leads ---
    async fn insert_lead(&self, lead: &Lead) -> Result<()>;
    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>>;
    async fn list_non_terminal_leads(&self) -> Result<Vec<Lead>>;
    async fn update_lead_score(
        &self,
        id: &LeadId,
        score: f64,
        tier: LeadTier,
        sla_deadline: DateTime<Utc>,
    ) -> Result<()>;
    async fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<()>;

    // --- agents ---
    async fn upsert_agent(&self, agent: &Agent) -> Result<()>;
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn list_available_agents(&self) -> Result<Vec<Agent>>;
    async fn update_agent_status(
        &self,
        id: &AgentId,
        status: AgentStatus,
        max_capacity: Option<u32>,
    ) -> Result<()>;
    async fn replace_specializations(
        &self,
        id: &AgentId,
        specializations: Vec<Specialization>,
    ) -> Result<()>;

    // --- capacity (atomic) ---
    /// Compare-and-increment: returns false when the agent is at max.
    async fn try_reserve_capacity(&self, id: &AgentId) -> Result<bool>;
    /// Unconditional increment for the manual-override path.
    async fn force_reserve_capacity(&self, id: &AgentId) -> Result<()>;
    /// Decrement floored at zero; stamps the capacity-freed timestamp.
    async fn release_capacity(&self, id: &AgentId) -> Result<()>;

    // --- assignments ---
    async fn insert_assignment(&self, assignment: &Assignment) -> Result<()>;
    async fn get_assignment(&self, id: &str) -> Result<Option<Assignment>>;
    /// The lead's capacity-holding assignment (pending or accepted),
    /// if one exists. At most one can exist per lead.
    async fn get_active_assignment(&self, lead_id: &LeadId) -> Result<Option<Assignment>>;
    async fn update_assignment_status(&self, id: &str, status: AssignmentStatus) -> Result<()>;
    /// Pending assignments whose expiry deadline is at or before the
    /// given instant.
    async fn list_expired_pending_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>>;
    /// Count of assignments created since the given instant, for the
    /// capacity forecast.
    async fn assignments_created_since(&self, since: DateTime<Utc>) -> Result<u64>;

    // --- queue entries ---
    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<()>;
    async fn remove_queue_entry(&self, lead_id: &LeadId) -> Result<()>;
    async fn get_queue_entry(&self, lead_id: &LeadId) -> Result<Option<QueueEntry>>;
    /// Entries in one queue ordered by priority descending.
    async fn list_queue(&self, queue: QueueType, limit: usize) -> Result<Vec<QueueEntry>>;
    async fn queue_stats(&self) -> Result<Vec<QueueStats>>;
    /// Unassigned, non-terminal leads whose SLA deadline falls within
    /// the threshold, ascending by proximity.
    async fn leads_approaching_sla(&self, threshold_minutes: i64) -> Result<Vec<Lead>>;

    // --- explanations ---
    async fn insert_explanation(&self, explanation: &RoutingExplanation) -> Result<()>;

    // --- experiments ---
    async fn insert_experiment(&self, experiment: &Experiment) -> Result<()>;
    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>>;
    async fn list_active_experiments(&self) -> Result<Vec<Experiment>>;
    async fn update_experiment(&self, experiment: &Experiment) -> Result<()>;
}

/// Bounded retry policy for retryable store failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

/// Run a store operation, retrying retryable failures with linear
/// backoff up to the policy bound.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(%err, attempt, "retryable store failure, backing off");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wrap a store future with the configured deadline. A timeout
/// surfaces as `StoreTimeout`, never as a hang.
pub(crate) async fn with_timeout<T, Fut>(
    operation: &'static str,
    millis: u64,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(millis), fut).await {
        Ok(result) => result,
        Err(_) => Err(LeadEngineError::StoreTimeout { operation, millis }),
    }
}
