//! # Agent Matching
//!
//! Capability, location, and performance scoring of candidate agents
//! for a lead. Matching never mutates state: the matcher is a pure
//! ranking function over an agent snapshot, so concurrent routing
//! decisions can call it without any locking. Capacity is only
//! *scored* here; the authoritative admission check happens later in
//! the capacity ledger's atomic reservation.
//!
//! An optional in-process [`CapabilityIndex`] pre-filters candidates
//! by insurance line before the full scoring pass; when the index is
//! absent the matcher falls back to scanning the full agent set from
//! the store.

pub mod capability;
pub mod matcher;

pub use capability::CapabilityIndex;
pub use matcher::{AgentMatcher, CandidateMatch};
