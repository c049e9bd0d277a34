//! Error types for the lead routing engine
//!
//! One taxonomy for the whole subsystem. Routing failures such as
//! exhausted capacity or an empty candidate set are reported as values
//! here, never as panics, so callers (HTTP boundary, queue sweeps,
//! batch routing) can react per item.

use thiserror::Error;

/// Result type alias for lead engine operations
pub type Result<T> = std::result::Result<T, LeadEngineError>;

/// Errors that can occur in the lead routing engine
#[derive(Debug, Error)]
pub enum LeadEngineError {
    /// Malformed input; never retried
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Missing lead/agent/experiment
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// No agent had a free capacity unit; the lead stays queued
    #[error("no agent capacity available for lead {lead_id}")]
    CapacityExhausted { lead_id: String },

    /// No agent passed the capability pre-filters
    #[error("no candidate agents for lead {lead_id}")]
    NoCandidates { lead_id: String },

    /// A capacity reservation race was lost; retried once by the router
    #[error("reservation conflict on agent {agent_id}")]
    ConcurrencyConflict { agent_id: crate::agent::AgentId },

    /// A store call exceeded its deadline; retryable with backoff
    #[error("store operation '{operation}' timed out after {millis}ms")]
    StoreTimeout { operation: &'static str, millis: u64 },

    /// Underlying database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Experiment lifecycle error (bad variant set, premature promotion)
    #[error("experiment error: {message}")]
    Experiment { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LeadEngineError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an experiment error
    pub fn experiment(message: impl Into<String>) -> Self {
        Self::Experiment {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a bounded automatic retry is appropriate
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreTimeout { .. } | Self::ConcurrencyConflict { .. }
        )
    }
}
