//! The routing engine
//!
//! Ranks candidates through the matcher, admits through the capacity
//! ledger, and persists the decision plus its explanation. The ranked
//! walk falls through to the next candidate whenever a reservation
//! races and loses; a lead is therefore never assigned to an agent
//! whose reservation did not succeed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentId};
use crate::assignment::{Assignment, AssignmentStatus, ExplainedCandidate, RoutingExplanation};
use crate::capacity::{CapacityLedger, ReserveOutcome};
use crate::config::RoutingConfig;
use crate::database::LeadStore;
use crate::error::{LeadEngineError, Result};
use crate::lead::{Lead, LeadId, LeadStatus};
use crate::matching::{AgentMatcher, CandidateMatch, CapabilityIndex};
use crate::queue::{QueueEntry, QueueType};
use crate::routing::RoutingStrategy;

/// Per-call routing options
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteRequest {
    /// Override the configured default strategy
    pub strategy: Option<RoutingStrategy>,
    /// Required for manual routing; ignored otherwise
    #[serde(default)]
    pub preferred_agent: Option<AgentId>,
    /// Manual only: reserve even when the agent is at max capacity
    #[serde(default)]
    pub force: bool,
}

/// Outcome of a single routing call
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub assignment: Assignment,
    /// True when an existing pending assignment was returned instead
    /// of creating a new one
    pub already_assigned: bool,
}

/// Outcome of a reroute: either immediately re-assigned or parked in
/// the reassignment queue for the next sweep
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RerouteOutcome {
    Reassigned { assignment: Assignment },
    Queued { reason: String },
}

/// Per-lead result of a batch routing pass
#[derive(Debug, Clone, Serialize)]
pub struct BatchRouteReport {
    pub routed: Vec<Assignment>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub lead_id: LeadId,
    pub error: String,
}

/// Routes leads to agents
pub struct Router {
    store: Arc<dyn LeadStore>,
    matcher: AgentMatcher,
    ledger: CapacityLedger,
    index: Arc<CapabilityIndex>,
    config: RoutingConfig,
    /// Counts hybrid routes to trigger the periodic re-balance pass
    hybrid_routes: AtomicU64,
}

impl Router {
    pub fn new(
        store: Arc<dyn LeadStore>,
        matcher: AgentMatcher,
        index: Arc<CapabilityIndex>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            ledger: CapacityLedger::new(store.clone()),
            store,
            matcher,
            index,
            config,
            hybrid_routes: AtomicU64::new(0),
        }
    }

    pub fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    /// Route one lead. Idempotent: a lead whose assignment is still
    /// pending or accepted gets that assignment back instead of a
    /// second one.
    pub async fn route_lead(&self, lead_id: &LeadId, request: RouteRequest) -> Result<RouteDecision> {
        let lead = self.fetch_routable_lead(lead_id).await?;

        if let Some(existing) = self.store.get_active_assignment(lead_id).await? {
            debug!(lead = %lead_id, assignment = %existing.id, "lead already assigned");
            return Ok(RouteDecision {
                assignment: existing,
                already_assigned: true,
            });
        }

        let strategy = request.strategy.unwrap_or(self.config.default_strategy);
        let assignment = match strategy {
            RoutingStrategy::Manual => {
                self.route_manual(&lead, request.preferred_agent, request.force)
                    .await?
            }
            _ => {
                if strategy == RoutingStrategy::Hybrid {
                    self.maybe_rebalance().await;
                }
                self.route_ranked(&lead, strategy, None).await?
            }
        };

        Ok(RouteDecision {
            assignment,
            already_assigned: false,
        })
    }

    /// Tear down a lead's pending assignment and route it again,
    /// excluding the previous agent. Capacity on the previous agent is
    /// always released, even when re-routing fails.
    pub async fn reroute_lead(&self, lead_id: &LeadId, reason: &str) -> Result<RerouteOutcome> {
        let lead = self.fetch_routable_lead(lead_id).await?;
        let previous = self
            .store
            .get_active_assignment(lead_id)
            .await?
            .ok_or_else(|| {
                LeadEngineError::validation(format!("lead {lead_id} has no active assignment"))
            })?;

        self.store
            .update_assignment_status(&previous.id, AssignmentStatus::Reassigned)
            .await?;
        self.ledger.release(&previous.agent_id).await?;
        info!(
            lead = %lead_id,
            previous_agent = %previous.agent_id,
            reason,
            "assignment torn down for reroute"
        );

        match self
            .route_ranked(&lead, previous.strategy, Some(&previous.agent_id))
            .await
        {
            Ok(assignment) => Ok(RerouteOutcome::Reassigned { assignment }),
            Err(
                err @ (LeadEngineError::NoCandidates { .. }
                | LeadEngineError::CapacityExhausted { .. }),
            ) => {
                self.store
                    .upsert_queue_entry(&QueueEntry::for_lead(&lead, QueueType::Reassignment))
                    .await?;
                warn!(lead = %lead_id, %err, "reroute parked in reassignment queue");
                Ok(RerouteOutcome::Queued {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Agent takes the lead: the pending assignment becomes
    /// `Accepted`. Capacity stays reserved while the agent works the
    /// lead and is released when the lead reaches a terminal status.
    pub async fn accept_assignment(&self, lead_id: &LeadId) -> Result<Assignment> {
        let mut assignment = self.pending_assignment(lead_id).await?;
        self.store
            .update_assignment_status(&assignment.id, AssignmentStatus::Accepted)
            .await?;
        assignment.status = AssignmentStatus::Accepted;
        // First contact: a freshly ingested lead advances on accept.
        if let Some(lead) = self.store.get_lead(lead_id).await? {
            if lead.status == LeadStatus::New {
                self.store
                    .update_lead_status(lead_id, LeadStatus::Contacted)
                    .await?;
            }
        }
        info!(lead = %lead_id, agent = %assignment.agent_id, "assignment accepted");
        Ok(assignment)
    }

    /// Agent declines the lead: the assignment terminates, capacity is
    /// released, and the lead is parked in the reassignment queue for
    /// the next sweep.
    pub async fn reject_assignment(&self, lead_id: &LeadId, reason: &str) -> Result<Assignment> {
        let mut assignment = self.pending_assignment(lead_id).await?;
        self.store
            .update_assignment_status(&assignment.id, AssignmentStatus::Rejected)
            .await?;
        assignment.status = AssignmentStatus::Rejected;
        self.ledger.release(&assignment.agent_id).await?;

        let lead = self.fetch_routable_lead(lead_id).await?;
        self.store
            .upsert_queue_entry(&QueueEntry::for_lead(&lead, QueueType::Reassignment))
            .await?;
        info!(
            lead = %lead_id,
            agent = %assignment.agent_id,
            reason,
            "assignment rejected, lead parked for reassignment"
        );
        Ok(assignment)
    }

    /// Expire every pending assignment whose deadline has passed:
    /// mark it `Expired`, release the agent's capacity, and requeue
    /// the lead so a sweep can offer it again.
    pub async fn expire_assignments(&self, now: chrono::DateTime<Utc>) -> Result<usize> {
        let overdue = self.store.list_expired_pending_assignments(now).await?;
        let mut expired = 0usize;
        for assignment in overdue {
            self.store
                .update_assignment_status(&assignment.id, AssignmentStatus::Expired)
                .await?;
            self.ledger.release(&assignment.agent_id).await?;
            warn!(
                lead = %assignment.lead_id,
                agent = %assignment.agent_id,
                assignment = %assignment.id,
                "pending assignment expired"
            );
            match self.store.get_lead(&assignment.lead_id).await? {
                Some(lead) if !lead.status.is_terminal() => {
                    self.store
                        .upsert_queue_entry(&QueueEntry::for_lead(&lead, QueueType::Reassignment))
                        .await?;
                }
                _ => {}
            }
            expired += 1;
        }
        Ok(expired)
    }

    async fn pending_assignment(&self, lead_id: &LeadId) -> Result<Assignment> {
        let assignment = self
            .store
            .get_active_assignment(lead_id)
            .await?
            .ok_or_else(|| {
                LeadEngineError::validation(format!("lead {lead_id} has no active assignment"))
            })?;
        if assignment.status != AssignmentStatus::Pending {
            return Err(LeadEngineError::validation(format!(
                "assignment {} is {}, not pending",
                assignment.id, assignment.status
            )));
        }
        Ok(assignment)
    }

    /// Route many leads. The optimal strategy runs one global pass
    /// that maximizes total match score; every other strategy routes
    /// each lead independently under a concurrency bound.
    pub async fn route_batch(
        self: &Arc<Self>,
        lead_ids: Vec<LeadId>,
        strategy: Option<RoutingStrategy>,
    ) -> Result<BatchRouteReport> {
        let strategy = strategy.unwrap_or(self.config.default_strategy);
        if strategy == RoutingStrategy::Optimal {
            return self.route_batch_optimal(lead_ids).await;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.batch_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for lead_id in lead_ids {
            let router = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Closing the semaphore is the only acquire failure
                // mode, and it never closes while tasks run.
                let _permit = semaphore.acquire_owned().await;
                let result = router
                    .route_lead(
                        &lead_id,
                        RouteRequest {
                            strategy: Some(strategy),
                            ..RouteRequest::default()
                        },
                    )
                    .await;
                (lead_id, result)
            });
        }

        let mut report = BatchRouteReport {
            routed: Vec::new(),
            failures: Vec::new(),
        };
        while let Some(joined) = tasks.join_next().await {
            let (lead_id, result) = joined
                .map_err(|e| LeadEngineError::internal(format!("batch task panicked: {e}")))?;
            match result {
                Ok(decision) => report.routed.push(decision.assignment),
                Err(err) => report.failures.push(BatchFailure {
                    lead_id,
                    error: err.to_string(),
                }),
            }
        }
        Ok(report)
    }

    /// Global assignment pass: score every (lead, agent) pair, then
    /// greedily take pairs in descending score order so the total
    /// match score across the batch is maximized.
    async fn route_batch_optimal(&self, lead_ids: Vec<LeadId>) -> Result<BatchRouteReport> {
        let mut report = BatchRouteReport {
            routed: Vec::new(),
            failures: Vec::new(),
        };

        let mut leads = Vec::new();
        for lead_id in lead_ids {
            match self.fetch_routable_lead(&lead_id).await {
                Ok(lead) => {
                    if self.store.get_active_assignment(&lead_id).await?.is_some() {
                        debug!(lead = %lead_id, "skipping already-assigned lead in batch");
                    } else {
                        leads.push(lead);
                    }
                }
                Err(err) => report.failures.push(BatchFailure {
                    lead_id,
                    error: err.to_string(),
                }),
            }
        }

        let agents = self.store.list_available_agents().await?;
        let mut pairs: Vec<(usize, CandidateMatch)> = Vec::new();
        for (i, lead) in leads.iter().enumerate() {
            let candidates = self.ranked_candidates(lead, &agents, None);
            for candidate in candidates {
                pairs.push((i, candidate));
            }
        }
        pairs.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut assigned: HashSet<usize> = HashSet::new();
        for (i, candidate) in pairs {
            if assigned.contains(&i) {
                continue;
            }
            if self.ledger.try_reserve(&candidate.agent.id).await? == ReserveOutcome::NoCapacity {
                continue;
            }
            match self
                .finalize_assignment(&leads[i], RoutingStrategy::Optimal, &candidate, Vec::new())
                .await
            {
                Ok(assignment) => {
                    assigned.insert(i);
                    report.routed.push(assignment);
                }
                Err(err) => {
                    report.failures.push(BatchFailure {
                        lead_id: leads[i].id.clone(),
                        error: err.to_string(),
                    });
                    assigned.insert(i);
                }
            }
        }

        for (i, lead) in leads.iter().enumerate() {
            if !assigned.contains(&i) {
                report.failures.push(BatchFailure {
                    lead_id: lead.id.clone(),
                    error: LeadEngineError::CapacityExhausted {
                        lead_id: lead.id.0.clone(),
                    }
                    .to_string(),
                });
            }
        }
        Ok(report)
    }

    async fn fetch_routable_lead(&self, lead_id: &LeadId) -> Result<Lead> {
        let lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| LeadEngineError::not_found("lead", lead_id.0.clone()))?;
        if lead.status.is_terminal() {
            return Err(LeadEngineError::validation(format!(
                "lead {lead_id} is {} and cannot be routed",
                lead.status
            )));
        }
        Ok(lead)
    }

    async fn route_manual(
        &self,
        lead: &Lead,
        preferred: Option<AgentId>,
        force: bool,
    ) -> Result<Assignment> {
        let agent_id = preferred.ok_or_else(|| {
            LeadEngineError::validation("manual routing requires a preferred agent")
        })?;
        let agent = self
            .store
            .get_agent(&agent_id)
            .await?
            .ok_or_else(|| LeadEngineError::not_found("agent", agent_id.0.clone()))?;

        match self.ledger.try_reserve(&agent_id).await? {
            ReserveOutcome::Reserved => {}
            ReserveOutcome::NoCapacity if force => {
                warn!(lead = %lead.id, agent = %agent_id, "forcing manual assignment over capacity");
                self.ledger.force_reserve(&agent_id).await?;
            }
            ReserveOutcome::NoCapacity => {
                return Err(LeadEngineError::CapacityExhausted {
                    lead_id: lead.id.0.clone(),
                });
            }
        }

        // Score the chosen agent for the audit trail; a capability
        // mismatch still routes, it just scores zero.
        let candidate = self
            .matcher
            .find_candidates(lead, std::slice::from_ref(&agent))
            .into_iter()
            .next()
            .unwrap_or(CandidateMatch {
                agent,
                score: 0.0,
                reasons: vec!["manual override without capability match".to_string()],
            });

        let mut notes = vec!["manual agent selection".to_string()];
        if force {
            notes.push("capacity check overridden".to_string());
        }
        self.finalize_assignment(lead, RoutingStrategy::Manual, &candidate, notes)
            .await
    }

    /// Ranked candidate walk shared by greedy and hybrid routing.
    async fn route_ranked(
        &self,
        lead: &Lead,
        strategy: RoutingStrategy,
        exclude: Option<&AgentId>,
    ) -> Result<Assignment> {
        let mut attempts = 0u32;
        loop {
            let agents = self.store.list_available_agents().await?;
            let candidates = self.ranked_candidates(lead, &agents, exclude);
            if candidates.is_empty() {
                return Err(LeadEngineError::NoCandidates {
                    lead_id: lead.id.0.clone(),
                });
            }

            let mut considered = Vec::new();
            for candidate in candidates {
                let reserved =
                    self.ledger.try_reserve(&candidate.agent.id).await? == ReserveOutcome::Reserved;
                considered.push(ExplainedCandidate {
                    agent_id: candidate.agent.id.clone(),
                    score: candidate.score,
                    reasons: candidate.reasons.clone(),
                    reserved,
                });
                if reserved {
                    return self
                        .finalize_assignment_explained(lead, strategy, &candidate, considered)
                        .await;
                }
            }

            // Every reservation lost its race or found the agent full.
            // A bounded retry re-reads the snapshot once in case load
            // was released mid-walk.
            if attempts >= self.config.max_reservation_retries {
                let explanation = {
                    let mut e = RoutingExplanation::new(lead.id.clone(), strategy);
                    e.considered = considered;
                    e.note("all candidate reservations failed");
                    e
                };
                self.store.insert_explanation(&explanation).await?;
                return Err(LeadEngineError::CapacityExhausted {
                    lead_id: lead.id.0.clone(),
                });
            }
            attempts += 1;
            debug!(lead = %lead.id, attempt = attempts, "retrying after lost reservation races");
        }
    }

    fn ranked_candidates(
        &self,
        lead: &Lead,
        agents: &[Agent],
        exclude: Option<&AgentId>,
    ) -> Vec<CandidateMatch> {
        // Pre-filter through the capability index when it has been
        // built; a missing line entry means no capable agents. The
        // lookup honors the matcher's fuzzy line matching so compound
        // specializations stay reachable.
        let pool: Vec<Agent> = match self.index.is_empty() {
            true => agents.to_vec(),
            false => {
                let capable = self.index.candidates_matching(
                    &lead.insurance_line,
                    self.matcher.config().fuzzy_line_match,
                );
                agents
                    .iter()
                    .filter(|agent| {
                        capable
                            .as_ref()
                            .is_some_and(|set| set.contains(&agent.id))
                    })
                    .cloned()
                    .collect()
            }
        };
        self.matcher
            .find_candidates(lead, &pool)
            .into_iter()
            .filter(|candidate| exclude != Some(&candidate.agent.id))
            .collect()
    }

    async fn finalize_assignment(
        &self,
        lead: &Lead,
        strategy: RoutingStrategy,
        candidate: &CandidateMatch,
        notes: Vec<String>,
    ) -> Result<Assignment> {
        let considered = vec![ExplainedCandidate {
            agent_id: candidate.agent.id.clone(),
            score: candidate.score,
            reasons: candidate.reasons.clone(),
            reserved: true,
        }];
        let mut explanation = RoutingExplanation::new(lead.id.clone(), strategy);
        explanation.considered = considered.clone();
        for note in notes {
            explanation.note(note);
        }
        self.commit(lead, strategy, candidate, explanation).await
    }

    async fn finalize_assignment_explained(
        &self,
        lead: &Lead,
        strategy: RoutingStrategy,
        candidate: &CandidateMatch,
        considered: Vec<ExplainedCandidate>,
    ) -> Result<Assignment> {
        let mut explanation = RoutingExplanation::new(lead.id.clone(), strategy);
        explanation.considered = considered;
        self.commit(lead, strategy, candidate, explanation).await
    }

    /// Persist the assignment with the reservation already held. Any
    /// failure past this point releases the reservation so capacity
    /// never leaks.
    async fn commit(
        &self,
        lead: &Lead,
        strategy: RoutingStrategy,
        candidate: &CandidateMatch,
        mut explanation: RoutingExplanation,
    ) -> Result<Assignment> {
        let agent_id = candidate.agent.id.clone();

        // The lead can go terminal between the candidate snapshot and
        // the reservation; re-check before binding it.
        match self.store.get_lead(&lead.id).await {
            Ok(Some(current)) if !current.status.is_terminal() => {}
            Ok(_) => {
                self.ledger.release(&agent_id).await?;
                return Err(LeadEngineError::validation(format!(
                    "lead {} went terminal during routing",
                    lead.id
                )));
            }
            Err(err) => {
                self.ledger.release(&agent_id).await?;
                return Err(err);
            }
        }

        let assignment = Assignment::new(
            lead.id.clone(),
            agent_id.clone(),
            candidate.score,
            candidate.reasons.clone(),
            strategy,
            Utc::now() + Duration::hours(self.config.assignment_expiry_hours),
        );
        if let Err(err) = self.store.insert_assignment(&assignment).await {
            self.ledger.release(&agent_id).await?;
            // The store's one-active-assignment constraint caught a
            // concurrent route on the same lead; yield to the winner.
            if matches!(err, LeadEngineError::ConcurrencyConflict { .. }) {
                if let Some(existing) = self.store.get_active_assignment(&lead.id).await? {
                    debug!(lead = %lead.id, assignment = %existing.id, "lost routing race");
                    return Ok(existing);
                }
            }
            return Err(err);
        }

        // The lead now waits on the agent; move it to the waiting
        // queue so the sweep stops offering it.
        self.store
            .upsert_queue_entry(&QueueEntry::for_lead(lead, QueueType::Waiting))
            .await?;

        explanation.winner = Some(agent_id.clone());
        self.store.insert_explanation(&explanation).await?;

        info!(
            lead = %lead.id,
            agent = %agent_id,
            %strategy,
            score = candidate.score,
            "lead assigned"
        );
        Ok(assignment)
    }

    /// Every Nth hybrid route drains the reassignment queue through
    /// the optimal pass.
    async fn maybe_rebalance(&self) {
        let n = self.hybrid_routes.fetch_add(1, Ordering::Relaxed) + 1;
        let interval = self.config.hybrid_rebalance_interval.max(1);
        if n % interval != 0 {
            return;
        }
        let entries = match self.store.list_queue(QueueType::Reassignment, 50).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "hybrid rebalance could not read reassignment queue");
                return;
            }
        };
        if entries.is_empty() {
            return;
        }
        let lead_ids: Vec<LeadId> = entries.into_iter().map(|e| e.lead_id).collect();
        debug!(leads = lead_ids.len(), "hybrid rebalance pass");
        // Successful routes move the leads to the waiting queue in
        // commit(); failures stay parked for the next pass.
        match self.route_batch_optimal(lead_ids).await {
            Ok(report) => {
                if !report.routed.is_empty() {
                    info!(rebalanced = report.routed.len(), "hybrid rebalance assigned leads");
                }
            }
            Err(err) => warn!(%err, "hybrid rebalance pass failed"),
        }
    }
}
