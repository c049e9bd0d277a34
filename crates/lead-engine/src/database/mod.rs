//! # Persistence Layer
//!
//! A single repository trait ([`LeadStore`]) abstracts the relational
//! store for leads, agents, assignments, queue entries, explanations,
//! and experiments. The transactional SQLite implementation
//! ([`SqliteStore`]) is authoritative in production; the in-process
//! [`MemoryStore`] exists as a test double.
//!
//! The one mutation with real concurrency stakes is capacity
//! reservation: `try_reserve_capacity` must be a single guarded
//! update whose affected-row count decides the outcome, so two
//! concurrent routing decisions can never both take the last unit of
//! an agent's capacity.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{with_retries, LeadStore, RetryPolicy};
