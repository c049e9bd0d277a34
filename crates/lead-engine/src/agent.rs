//! Agent types
//!
//! Agents carry a specialization set and a capacity window. The
//! current/max capacity pair is owned by the capacity ledger; nothing
//! else mutates it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeadEngineError;

/// Unique agent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Agent availability status; only `Available` agents receive leads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Available,
    InCall,
    Break,
    Training,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InCall => "in_call",
            Self::Break => "break",
            Self::Training => "training",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = LeadEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "in_call" => Ok(Self::InCall),
            "break" => Ok(Self::Break),
            "training" => Ok(Self::Training),
            "offline" => Ok(Self::Offline),
            other => Err(LeadEngineError::validation(format!(
                "unknown agent status '{other}'"
            ))),
        }
    }
}

/// One capability tuple: line x segment x proficiency x languages x territories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialization {
    pub insurance_line: String,
    pub customer_segment: String,
    /// Proficiency 1-5
    pub proficiency: u8,
    pub languages: Vec<String>,
    pub territories: Vec<String>,
}

impl Specialization {
    pub fn new(line: impl Into<String>, segment: impl Into<String>, proficiency: u8) -> Self {
        Self {
            insurance_line: line.into(),
            customer_segment: segment.into(),
            proficiency: proficiency.clamp(1, 5),
            languages: Vec::new(),
            territories: Vec::new(),
        }
    }
}

/// A human agent leads are routed to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    pub max_capacity: u32,
    /// Invariant: 0 <= current_capacity <= max_capacity (ledger-enforced)
    pub current_capacity: u32,
    pub specializations: Vec<Specialization>,
    /// Star rating, 0-5
    pub rating: f64,
    /// Historical conversion rate, 0-1
    pub conversion_rate: f64,
    pub avg_response_minutes: f64,
    pub city: Option<String>,
    pub state: Option<String>,
    /// When a capacity unit was last freed; final routing tie-break
    pub last_released_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn has_free_capacity(&self) -> bool {
        self.current_capacity < self.max_capacity
    }

    /// Fraction of capacity still free, 0.0 when saturated
    pub fn free_fraction(&self) -> f64 {
        if self.max_capacity == 0 {
            return 0.0;
        }
        let free = self.max_capacity.saturating_sub(self.current_capacity);
        f64::from(free) / f64::from(self.max_capacity)
    }

    /// Utilization fraction for the capacity heatmap
    pub fn utilization(&self) -> f64 {
        if self.max_capacity == 0 {
            return 1.0;
        }
        f64::from(self.current_capacity) / f64::from(self.max_capacity)
    }
}
