//! Commonly used types in one import

pub use crate::agent::{Agent, AgentId, AgentStatus, Specialization};
pub use crate::assignment::{Assignment, AssignmentStatus, RoutingExplanation};
pub use crate::capacity::{AgentUtilization, CapacityForecast, CapacityLedger, ReserveOutcome};
pub use crate::config::LeadEngineConfig;
pub use crate::database::{LeadStore, MemoryStore, SqliteStore};
pub use crate::engine::{EngineStats, LeadEngine, LeadIntake, NewAgent, NewLead};
pub use crate::error::{LeadEngineError, Result};
pub use crate::experiment::{
    Experiment, ExperimentController, NewExperiment, NewVariant, OutcomeReport, PromotionDecision,
    SuccessMetric,
};
pub use crate::lead::{Lead, LeadDetails, LeadId, LeadSource, LeadStatus, LeadTier};
pub use crate::matching::{AgentMatcher, CandidateMatch, CapabilityIndex};
pub use crate::queue::{QueueEntry, QueueManager, QueueStats, QueueType};
pub use crate::routing::{
    RerouteOutcome, RouteDecision, RouteRequest, Router, RoutingStrategy,
};
pub use crate::scoring::{LeadScorer, ScoreOutcome, SlaStatus};
pub use crate::server::{LeadEngineServer, LeadEngineServerBuilder};
