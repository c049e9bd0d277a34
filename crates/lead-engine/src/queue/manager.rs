//! Queue classification, sweeps, and overrides

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::database::LeadStore;
use crate::error::{LeadEngineError, Result};
use crate::lead::{Lead, LeadId, LeadTier};
use crate::queue::{QueueEntry, QueueStats, QueueType};
use crate::routing::{RouteRequest, Router};

/// Keeps every lead in exactly one queue and drains the routable
/// queues through the router
pub struct QueueManager {
    store: Arc<dyn LeadStore>,
    config: QueueConfig,
}

impl QueueManager {
    pub fn new(store: Arc<dyn LeadStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Which queue a lead belongs in. Terminal and unqualified leads
    /// sit in no queue at all.
    pub fn classify(lead: &Lead, has_active_assignment: bool, rerouted: bool) -> Option<QueueType> {
        if lead.status.is_terminal() {
            return None;
        }
        if has_active_assignment {
            return Some(QueueType::Waiting);
        }
        if rerouted {
            return Some(QueueType::Reassignment);
        }
        match lead.tier {
            LeadTier::Hot => Some(QueueType::Hot),
            LeadTier::Warm => Some(QueueType::Active),
            LeadTier::Cold => Some(QueueType::Nurture),
            LeadTier::Unqualified => None,
        }
    }

    /// Re-derive and persist the lead's queue membership.
    pub async fn refresh_lead(&self, lead: &Lead) -> Result<Option<QueueType>> {
        let assigned = self.store.get_active_assignment(&lead.id).await?.is_some();
        match Self::classify(lead, assigned, false) {
            Some(queue) => {
                self.store
                    .upsert_queue_entry(&QueueEntry::for_lead(lead, queue))
                    .await?;
                debug!(lead = %lead.id, %queue, "lead queued");
                Ok(Some(queue))
            }
            None => {
                self.store.remove_queue_entry(&lead.id).await?;
                Ok(None)
            }
        }
    }

    /// Drain up to `max` entries from one queue through the router,
    /// highest priority first. Stops early once agent capacity is
    /// exhausted; remaining entries stay queued for the next sweep.
    pub async fn process_queue(
        &self,
        queue: QueueType,
        max: usize,
        router: &Arc<Router>,
    ) -> Result<usize> {
        let entries = self.store.list_queue(queue, max).await?;
        let mut assigned = 0usize;
        for entry in entries {
            match router.route_lead(&entry.lead_id, RouteRequest::default()).await {
                Ok(_) => assigned += 1,
                Err(LeadEngineError::CapacityExhausted { .. }) => {
                    debug!(%queue, lead = %entry.lead_id, "capacity exhausted, sweep stops");
                    break;
                }
                Err(LeadEngineError::NoCandidates { .. }) => {
                    // No capable agent right now; leave the entry and
                    // keep draining the rest of the queue.
                    debug!(%queue, lead = %entry.lead_id, "no candidates, entry retained");
                }
                Err(err) => {
                    warn!(%queue, lead = %entry.lead_id, %err, "sweep routing failure");
                }
            }
        }
        if assigned > 0 {
            info!(%queue, assigned, "queue sweep assigned leads");
        }
        Ok(assigned)
    }

    /// Operator override: park a lead in a specific queue regardless
    /// of its classification.
    pub async fn move_lead(&self, lead_id: &LeadId, queue: QueueType, reason: &str) -> Result<()> {
        let lead = self
            .store
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| LeadEngineError::not_found("lead", lead_id.0.clone()))?;
        if lead.status.is_terminal() {
            return Err(LeadEngineError::validation(format!(
                "lead {lead_id} is {} and cannot be queued",
                lead.status
            )));
        }
        self.store
            .upsert_queue_entry(&QueueEntry::for_lead(&lead, queue))
            .await?;
        info!(lead = %lead_id, %queue, reason, "lead moved by operator");
        Ok(())
    }

    pub async fn stats(&self) -> Result<Vec<QueueStats>> {
        self.store.queue_stats().await
    }

    pub async fn list(&self, queue: QueueType, limit: usize) -> Result<Vec<QueueEntry>> {
        self.store.list_queue(queue, limit).await
    }

    /// Unassigned, non-terminal leads whose SLA deadline is within
    /// the threshold.
    pub async fn approaching_sla(&self, threshold_minutes: i64) -> Result<Vec<Lead>> {
        self.store.leads_approaching_sla(threshold_minutes).await
    }
}
