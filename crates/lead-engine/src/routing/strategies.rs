//! Routing strategy selection

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LeadEngineError;

/// How the router picks an agent for a lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// Best-ranked candidate wins immediately
    Greedy,
    /// Batch-global assignment maximizing total match score
    Optimal,
    /// Greedy per lead with periodic optimal re-balancing
    Hybrid,
    /// Operator-chosen agent, bypassing the ranking
    Manual,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Optimal => "optimal",
            Self::Hybrid => "hybrid",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = LeadEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "optimal" => Ok(Self::Optimal),
            "hybrid" => Ok(Self::Hybrid),
            "manual" => Ok(Self::Manual),
            other => Err(LeadEngineError::validation(format!(
                "unknown routing strategy '{other}'"
            ))),
        }
    }
}
