//! Request and response bodies for the HTTP layer

use serde::{Deserialize, Serialize};

use crate::agent::{AgentStatus, Specialization};
use crate::lead::LeadStatus;
use crate::routing::RoutingStrategy;
use crate::scoring::SlaStatus;

#[derive(Debug, Deserialize)]
pub struct AvailabilityUpdate {
    pub status: AgentStatus,
    #[serde(default)]
    pub max_capacity: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SpecializationUpdate {
    pub specializations: Vec<Specialization>,
}

#[derive(Debug, Deserialize)]
pub struct LeadStatusUpdate {
    pub status: LeadStatus,
}

#[derive(Debug, Deserialize)]
pub struct BatchAssignRequest {
    pub lead_ids: Vec<String>,
    #[serde(default)]
    pub strategy: Option<RoutingStrategy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RerouteRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub max: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub lead_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    #[serde(default)]
    pub hours: Option<u32>,
}

/// `threshold` is minutes until the SLA deadline.
#[derive(Debug, Deserialize)]
pub struct SlaQuery {
    #[serde(default)]
    pub threshold: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Lead snapshot with its live SLA position
#[derive(Debug, Serialize)]
pub struct LeadView {
    #[serde(flatten)]
    pub lead: crate::lead::Lead,
    pub sla: SlaStatus,
}

/// Score breakdown with the lead's live SLA position
#[derive(Debug, Serialize)]
pub struct ScoreView {
    #[serde(flatten)]
    pub outcome: crate::scoring::ScoreOutcome,
    pub sla: SlaStatus,
}

#[derive(Debug, Serialize)]
pub struct RescoreResponse {
    pub changed: usize,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub assigned: usize,
}
