//! Queue types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeadEngineError;
use crate::lead::{Lead, LeadId};

/// The five lead queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    Hot,
    Active,
    Nurture,
    Waiting,
    Reassignment,
}

impl QueueType {
    pub const ALL: [QueueType; 5] = [
        QueueType::Hot,
        QueueType::Active,
        QueueType::Nurture,
        QueueType::Waiting,
        QueueType::Reassignment,
    ];

    /// Queues the background sweep drains into the router, in order
    pub const ROUTABLE: [QueueType; 3] =
        [QueueType::Reassignment, QueueType::Hot, QueueType::Active];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Active => "active",
            Self::Nurture => "nurture",
            Self::Waiting => "waiting",
            Self::Reassignment => "reassignment",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = LeadEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(Self::Hot),
            "active" => Ok(Self::Active),
            "nurture" => Ok(Self::Nurture),
            "waiting" => Ok(Self::Waiting),
            "reassignment" => Ok(Self::Reassignment),
            other => Err(LeadEngineError::validation(format!(
                "unknown queue type '{other}'"
            ))),
        }
    }
}

/// Derived queue membership for one lead; a lead is in exactly one queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub lead_id: LeadId,
    pub queue: QueueType,
    /// Orders tier desc, then SLA deadline asc
    pub priority: f64,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn for_lead(lead: &Lead, queue: QueueType) -> Self {
        Self {
            lead_id: lead.id.clone(),
            queue,
            priority: priority_score(lead),
            enqueued_at: Utc::now(),
        }
    }
}

/// Higher tier beats everything; within a tier the earlier SLA
/// deadline wins. Encoded so a plain descending sort gives that order.
pub fn priority_score(lead: &Lead) -> f64 {
    let tier_component = f64::from(lead.tier.rank()) * 1e12;
    tier_component - lead.sla_deadline.timestamp() as f64
}

/// Depth and age snapshot of one queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: QueueType,
    pub depth: usize,
    pub oldest_wait_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::{LeadDetails, LeadSource, LeadStatus, LeadTier};
    use chrono::Duration;

    fn lead(tier: LeadTier, deadline_offset_min: i64) -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId::from("l"),
            insurance_line: "auto".into(),
            quality_score: 80.0,
            tier,
            status: LeadStatus::New,
            source: LeadSource::WebForm,
            city: None,
            state: None,
            preferred_language: None,
            created_at: now,
            sla_deadline: now + Duration::minutes(deadline_offset_min),
            details: LeadDetails::default(),
        }
    }

    #[test]
    fn tier_dominates_priority() {
        let hot_late = priority_score(&lead(LeadTier::Hot, 600));
        let warm_urgent = priority_score(&lead(LeadTier::Warm, 1));
        assert!(hot_late > warm_urgent);
    }

    #[test]
    fn earlier_deadline_wins_within_tier() {
        let urgent = priority_score(&lead(LeadTier::Hot, 5));
        let relaxed = priority_score(&lead(LeadTier::Hot, 55));
        assert!(urgent > relaxed);
    }
}
