//! Assignment types and routing explanations
//!
//! An assignment is offered as `Pending`, then either accepted by the
//! agent, rejected, expired by the sweep, or torn down by a reroute.
//! `Pending` and `Accepted` both hold a unit of the agent's capacity;
//! the closed states have released it. At most one capacity-holding
//! assignment exists per lead, enforced by the store's unique
//! constraint and by the router returning the existing assignment
//! instead of creating a second one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::error::LeadEngineError;
use crate::lead::LeadId;
use crate::routing::RoutingStrategy;

/// Assignment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    /// Offered to the agent, awaiting acceptance
    Pending,
    /// Agent is working the lead; capacity stays reserved
    Accepted,
    Rejected,
    Expired,
    Reassigned,
}

impl AssignmentStatus {
    /// Closed states no longer hold agent capacity.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::Reassigned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Reassigned => "reassigned",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = LeadEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "reassigned" => Ok(Self::Reassigned),
            other => Err(LeadEngineError::validation(format!(
                "unknown assignment status '{other}'"
            ))),
        }
    }
}

/// A routing decision binding a lead to an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub lead_id: LeadId,
    pub agent_id: AgentId,
    pub status: AssignmentStatus,
    pub match_score: f64,
    pub match_reasons: Vec<String>,
    pub strategy: RoutingStrategy,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(
        lead_id: LeadId,
        agent_id: AgentId,
        match_score: f64,
        match_reasons: Vec<String>,
        strategy: RoutingStrategy,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id,
            agent_id,
            status: AssignmentStatus::Pending,
            match_score,
            match_reasons,
            strategy,
            expires_at,
            created_at: Utc::now(),
        }
    }
}

/// One candidate the router considered, with its ranked factors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainedCandidate {
    pub agent_id: AgentId,
    pub score: f64,
    pub reasons: Vec<String>,
    /// Whether the reservation attempt on this candidate succeeded
    pub reserved: bool,
}

/// Audit artifact emitted for every routing decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingExplanation {
    pub lead_id: LeadId,
    pub strategy: RoutingStrategy,
    pub considered: Vec<ExplainedCandidate>,
    pub winner: Option<AgentId>,
    pub notes: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

impl RoutingExplanation {
    pub fn new(lead_id: LeadId, strategy: RoutingStrategy) -> Self {
        Self {
            lead_id,
            strategy,
            considered: Vec::new(),
            winner: None,
            notes: Vec::new(),
            decided_at: Utc::now(),
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}
