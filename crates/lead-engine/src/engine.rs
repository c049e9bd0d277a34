//! The top-level engine facade
//!
//! Owns every subsystem (scorer, matcher, capacity ledger, router,
//! queue manager, experiment controller) over one shared store and
//! exposes the operations the HTTP layer and background sweeps call.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentId, AgentStatus, Specialization};
use crate::assignment::{Assignment, AssignmentStatus};
use crate::capacity::{AgentUtilization, CapacityForecast};
use crate::config::LeadEngineConfig;
use crate::database::{with_retries, LeadStore, RetryPolicy, SqliteStore};
use crate::error::{LeadEngineError, Result};
use crate::experiment::{
    Experiment, ExperimentController, NewExperiment, OutcomeReport, PromotionDecision,
};
use crate::lead::{Lead, LeadDetails, LeadId, LeadSource, LeadStatus, LeadTier};
use crate::matching::{AgentMatcher, CapabilityIndex};
use crate::queue::{QueueEntry, QueueManager, QueueStats, QueueType};
use crate::routing::{
    BatchRouteReport, RerouteOutcome, RouteDecision, RouteRequest, Router, RoutingStrategy,
};
use crate::scoring::{sla_deadline, LeadScorer, ScoreOutcome};

/// Intake payload for a new lead
#[derive(Debug, Clone, Deserialize)]
pub struct NewLead {
    /// Caller-supplied id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub insurance_line: String,
    pub source: LeadSource,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
    #[serde(default)]
    pub details: LeadDetails,
}

/// Intake payload for an agent
#[derive(Debug, Clone, Deserialize)]
pub struct NewAgent {
    pub id: String,
    pub name: String,
    pub max_capacity: u32,
    #[serde(default)]
    pub specializations: Vec<Specialization>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub conversion_rate: f64,
    #[serde(default)]
    pub avg_response_minutes: f64,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Result of ingesting one lead
#[derive(Debug, Clone, Serialize)]
pub struct LeadIntake {
    pub lead: Lead,
    pub score: ScoreOutcome,
    pub queue: Option<QueueType>,
}

/// Coarse engine counters for the stats endpoint and monitor loop
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub open_leads: usize,
    pub agents: usize,
    pub available_agents: usize,
    pub queues: Vec<QueueStats>,
}

/// One stop for everything the lead engine does
pub struct LeadEngine {
    config: LeadEngineConfig,
    store: Arc<dyn LeadStore>,
    scorer: LeadScorer,
    index: Arc<CapabilityIndex>,
    router: Arc<Router>,
    queues: QueueManager,
    experiments: ExperimentController,
}

impl LeadEngine {
    /// Build the engine over the configured SQLite database.
    pub async fn new(config: LeadEngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::connect(&config.database).await?);
        Ok(Self::assemble(config, store))
    }

    /// Build the engine over an externally constructed store.
    pub fn with_store(config: LeadEngineConfig, store: Arc<dyn LeadStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, store))
    }

    fn assemble(config: LeadEngineConfig, store: Arc<dyn LeadStore>) -> Self {
        let index = Arc::new(CapabilityIndex::new());
        let matcher = AgentMatcher::new(config.matching.clone());
        let router = Arc::new(Router::new(
            store.clone(),
            matcher,
            index.clone(),
            config.routing.clone(),
        ));
        let queues = QueueManager::new(store.clone(), config.queues.clone());
        let experiments = ExperimentController::new(store.clone());
        Self {
            scorer: LeadScorer::new(config.scoring.clone()),
            config,
            store,
            index,
            router,
            queues,
            experiments,
        }
    }

    pub fn config(&self) -> &LeadEngineConfig {
        &self.config
    }

    // --- leads ---

    /// Score, persist, and queue a new lead.
    pub async fn ingest_lead(&self, new: NewLead) -> Result<LeadIntake> {
        if new.insurance_line.trim().is_empty() {
            return Err(LeadEngineError::validation("insurance_line is required"));
        }
        let id = match new.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };
        if self.store.get_lead(&LeadId(id.clone())).await?.is_some() {
            return Err(LeadEngineError::validation(format!(
                "lead {id} already exists"
            )));
        }

        let created_at = Utc::now();
        let mut lead = Lead {
            id: LeadId(id),
            insurance_line: new.insurance_line.to_ascii_lowercase(),
            quality_score: 0.0,
            tier: LeadTier::Unqualified,
            status: LeadStatus::New,
            source: new.source,
            city: new.city,
            state: new.state,
            preferred_language: new.preferred_language,
            created_at,
            sla_deadline: created_at,
            details: new.details,
        };

        let score = self.scorer.score(&lead);
        lead.quality_score = score.score;
        lead.tier = score.tier;
        lead.sla_deadline = sla_deadline(
            score.tier,
            created_at,
            &self.scorer.config().sla_windows,
        );

        self.store.insert_lead(&lead).await?;
        let queue = self.queues.refresh_lead(&lead).await?;
        info!(
            lead = %lead.id,
            line = %lead.insurance_line,
            score = lead.quality_score,
            tier = %lead.tier,
            "lead ingested"
        );
        Ok(LeadIntake { lead, score, queue })
    }

    pub async fn get_lead(&self, lead_id: &LeadId) -> Result<Lead> {
        self.store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| LeadEngineError::not_found("lead", lead_id.0.clone()))
    }

    /// Current score breakdown for a lead; read-only, nothing persists.
    pub async fn score_of(&self, lead_id: &LeadId) -> Result<ScoreOutcome> {
        let lead = self.get_lead(lead_id).await?;
        Ok(self.scorer.score(&lead))
    }

    /// Rescore every non-terminal lead and refresh its queue
    /// placement. Individual failures are logged and skipped; the
    /// return value counts leads whose score actually changed.
    pub async fn rescore_all(&self) -> Result<usize> {
        let leads = self.store.list_non_terminal_leads().await?;
        let mut changed = 0usize;
        for mut lead in leads {
            let outcome = self.scorer.score(&lead);
            if (outcome.score - lead.quality_score).abs() < f64::EPSILON
                && outcome.tier == lead.tier
            {
                continue;
            }
            let deadline = sla_deadline(
                outcome.tier,
                lead.created_at,
                &self.scorer.config().sla_windows,
            );
            if let Err(err) = self
                .store
                .update_lead_score(&lead.id, outcome.score, outcome.tier, deadline)
                .await
            {
                warn!(lead = %lead.id, %err, "rescore skipped lead");
                continue;
            }
            lead.quality_score = outcome.score;
            lead.tier = outcome.tier;
            lead.sla_deadline = deadline;
            if let Err(err) = self.queues.refresh_lead(&lead).await {
                warn!(lead = %lead.id, %err, "queue refresh failed after rescore");
            }
            changed += 1;
        }
        info!(changed, "rescore pass complete");
        Ok(changed)
    }

    pub async fn update_lead_status(&self, lead_id: &LeadId, status: LeadStatus) -> Result<()> {
        let mut lead = self.get_lead(lead_id).await?;
        if lead.status.is_terminal() {
            return Err(LeadEngineError::validation(format!(
                "lead {lead_id} is already {}",
                lead.status
            )));
        }
        self.store.update_lead_status(lead_id, status).await?;
        // A closed lead no longer occupies its agent. The terminal
        // guard above makes this release fire at most once per lead.
        if status.is_terminal() {
            if let Some(assignment) = self.store.get_active_assignment(lead_id).await? {
                if assignment.status == AssignmentStatus::Pending {
                    self.store
                        .update_assignment_status(&assignment.id, AssignmentStatus::Accepted)
                        .await?;
                }
                self.router.ledger().release(&assignment.agent_id).await?;
                debug!(
                    lead = %lead_id,
                    agent = %assignment.agent_id,
                    "capacity released on lead close"
                );
            }
        }
        lead.status = status;
        self.queues.refresh_lead(&lead).await?;
        Ok(())
    }

    // --- agents ---

    pub async fn upsert_agent(&self, new: NewAgent) -> Result<Agent> {
        if new.max_capacity == 0 {
            return Err(LeadEngineError::validation("max_capacity must be positive"));
        }
        let agent = Agent {
            id: AgentId(new.id),
            name: new.name,
            status: AgentStatus::Available,
            max_capacity: new.max_capacity,
            current_capacity: 0,
            specializations: new.specializations,
            rating: new.rating.clamp(0.0, 5.0),
            conversion_rate: new.conversion_rate.clamp(0.0, 1.0),
            avg_response_minutes: new.avg_response_minutes.max(0.0),
            city: new.city,
            state: new.state,
            last_released_at: None,
        };
        self.store.upsert_agent(&agent).await?;
        self.rebuild_index().await?;
        info!(agent = %agent.id, capacity = agent.max_capacity, "agent upserted");
        Ok(agent)
    }

    pub async fn get_agent(&self, agent_id: &AgentId) -> Result<Agent> {
        self.store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| LeadEngineError::not_found("agent", agent_id.0.clone()))
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.store.list_agents().await
    }

    pub async fn set_agent_availability(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
        max_capacity: Option<u32>,
    ) -> Result<()> {
        if max_capacity == Some(0) {
            return Err(LeadEngineError::validation("max_capacity must be positive"));
        }
        self.store
            .update_agent_status(agent_id, status, max_capacity)
            .await?;
        debug!(agent = %agent_id, %status, "agent availability updated");
        Ok(())
    }

    pub async fn replace_specializations(
        &self,
        agent_id: &AgentId,
        specializations: Vec<Specialization>,
    ) -> Result<()> {
        self.store
            .replace_specializations(agent_id, specializations)
            .await?;
        self.rebuild_index().await
    }

    /// Rebuild the capability pre-filter from the current agent set.
    pub async fn rebuild_index(&self) -> Result<()> {
        let agents = self.store.list_agents().await?;
        self.index.rebuild(&agents);
        Ok(())
    }

    // --- routing ---

    /// Route one lead. When no explicit strategy is given and an
    /// experiment is active, the experiment's variant decides the
    /// strategy.
    pub async fn assign(&self, lead_id: &LeadId, mut request: RouteRequest) -> Result<RouteDecision> {
        if request.strategy.is_none() {
            if let Some((experiment, variant, strategy)) =
                self.experiments.strategy_for(lead_id).await?
            {
                debug!(
                    lead = %lead_id,
                    experiment = %experiment,
                    variant = %variant,
                    %strategy,
                    "experiment selected routing strategy"
                );
                request.strategy = Some(strategy);
            }
        }
        // Routing is idempotent per lead, so retrying a timed-out
        // attempt cannot double-assign.
        let policy = RetryPolicy::new(
            self.config.database.max_retries,
            self.config.database.retry_backoff_ms,
        );
        with_retries(policy, || self.router.route_lead(lead_id, request.clone())).await
    }

    pub async fn batch_assign(
        &self,
        lead_ids: Vec<LeadId>,
        strategy: Option<RoutingStrategy>,
    ) -> Result<BatchRouteReport> {
        self.router.route_batch(lead_ids, strategy).await
    }

    pub async fn reroute(&self, lead_id: &LeadId, reason: &str) -> Result<RerouteOutcome> {
        self.router.reroute_lead(lead_id, reason).await
    }

    /// Agent takes the offered assignment; capacity stays reserved.
    pub async fn accept_assignment(&self, lead_id: &LeadId) -> Result<Assignment> {
        self.router.accept_assignment(lead_id).await
    }

    /// Agent declines the offer: capacity is released and the lead is
    /// parked for rerouting.
    pub async fn reject_assignment(&self, lead_id: &LeadId, reason: &str) -> Result<Assignment> {
        self.router.reject_assignment(lead_id, reason).await
    }

    /// Expire overdue pending offers, releasing capacity and requeueing
    /// their leads. Returns the number of assignments expired.
    pub async fn expire_assignments(&self) -> Result<usize> {
        self.router.expire_assignments(Utc::now()).await
    }

    // --- queues ---

    pub async fn process_queue(&self, queue: QueueType, max: Option<usize>) -> Result<usize> {
        let max = max.unwrap_or(self.config.queues.sweep_batch_size);
        self.queues.process_queue(queue, max, &self.router).await
    }

    pub async fn move_lead(&self, lead_id: &LeadId, queue: QueueType, reason: &str) -> Result<()> {
        self.queues.move_lead(lead_id, queue, reason).await
    }

    pub async fn queue_stats(&self) -> Result<Vec<QueueStats>> {
        self.queues.stats().await
    }

    pub async fn queue_leads(&self, queue: QueueType, limit: usize) -> Result<Vec<QueueEntry>> {
        self.queues.list(queue, limit).await
    }

    pub async fn sla_at_risk(&self, threshold_minutes: Option<i64>) -> Result<Vec<Lead>> {
        let threshold =
            threshold_minutes.unwrap_or(self.config.queues.sla_risk_threshold_minutes);
        self.queues.approaching_sla(threshold).await
    }

    // --- capacity ---

    pub async fn capacity_heatmap(&self) -> Result<Vec<AgentUtilization>> {
        self.router.ledger().heatmap().await
    }

    pub async fn capacity_forecast(&self, window_hours: u32) -> Result<CapacityForecast> {
        self.router.ledger().forecast(window_hours).await
    }

    // --- experiments ---

    pub async fn create_experiment(&self, spec: NewExperiment) -> Result<Experiment> {
        self.experiments.create_experiment(spec).await
    }

    pub async fn active_experiments(&self) -> Result<Vec<Experiment>> {
        self.experiments.active_experiments().await
    }

    pub async fn experiment(&self, id: &str) -> Result<Experiment> {
        self.experiments.get_experiment(id).await
    }

    pub async fn record_experiment_outcome(
        &self,
        id: &str,
        outcome: OutcomeReport,
    ) -> Result<()> {
        self.experiments.record_outcome(id, outcome).await
    }

    pub async fn promote_experiment(&self, id: &str) -> Result<PromotionDecision> {
        self.experiments.promote_winner(id).await
    }

    // --- observability ---

    pub async fn stats(&self) -> Result<EngineStats> {
        let open_leads = self.store.list_non_terminal_leads().await?.len();
        let agents = self.store.list_agents().await?;
        let available_agents = agents
            .iter()
            .filter(|a| a.status == AgentStatus::Available)
            .count();
        Ok(EngineStats {
            open_leads,
            agents: agents.len(),
            available_agents,
            queues: self.queues.stats().await?,
        })
    }
}
