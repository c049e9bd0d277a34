//! # Strategy Experimentation
//!
//! A/B comparison of routing strategies. Traffic is split across
//! variants by a stable hash of (lead id, experiment id), so a lead
//! re-evaluated later always lands in the same variant. Outcome
//! metrics accumulate per variant; promotion requires every variant
//! to reach its minimum sample size and the leader to clear a
//! two-proportion z-test at the configured confidence level.

pub mod controller;
pub mod stats;

pub use controller::{
    Experiment, ExperimentController, ExperimentStatus, NewExperiment, NewVariant, OutcomeReport,
    PromotionDecision, SuccessMetric, Variant, VariantMetrics,
};
pub use stats::{two_proportion_z, welch_z, z_threshold};
