//! # Lead Queues
//!
//! Five queues partition the non-terminal lead population: hot,
//! active, and reassignment feed the routing sweeps (reassignment
//! drains first); nurture holds cold leads outside the sweep; waiting
//! holds leads with a pending assignment. A lead is in at most one
//! queue, ordered within it by tier and then SLA deadline.

pub mod manager;
pub mod types;

pub use manager::QueueManager;
pub use types::{priority_score, QueueEntry, QueueStats, QueueType};
