//! # Routing Engine
//!
//! Binds leads to agents. Four strategies share one invariant: an
//! assignment is only created after the capacity ledger's atomic
//! reservation on that agent succeeded, and any failure after the
//! reservation releases it. Greedy takes the best-ranked candidate
//! immediately; optimal maximizes total match score across a batch;
//! hybrid routes greedily and periodically re-balances the
//! reassignment queue through the optimal pass; manual honors an
//! operator's choice, optionally past the capacity limit.
//!
//! Every decision leaves a [`RoutingExplanation`] in the store listing
//! each candidate considered, its score factors, and whether its
//! reservation succeeded.
//!
//! [`RoutingExplanation`]: crate::assignment::RoutingExplanation

pub mod engine;
pub mod strategies;

pub use engine::{
    BatchFailure, BatchRouteReport, RerouteOutcome, RouteDecision, RouteRequest, Router,
};
pub use strategies::RoutingStrategy;
