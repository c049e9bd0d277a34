//! # Lead Engine
//!
//! A lead-assignment engine for insurance sales: scores incoming
//! leads, matches them to capable agents, and routes them under
//! strict capacity control.
//!
//! ## Architecture
//!
//! - **Scoring** ([`scoring`]): deterministic six-dimension quality
//!   scoring with per-line weights, tier bucketing, and SLA deadlines.
//! - **Matching** ([`matching`]): pure candidate ranking over agent
//!   capability, location, rating, performance, and free capacity.
//! - **Capacity** ([`capacity`]): atomic reservations; two concurrent
//!   routes can never both take an agent's last free slot.
//! - **Routing** ([`routing`]): greedy, optimal, hybrid, and manual
//!   strategies, reroutes, and per-decision explanations.
//! - **Queues** ([`queue`]): five queues partitioning the open lead
//!   population, drained by background sweeps.
//! - **Experiments** ([`experiment`]): A/B comparison of routing
//!   strategies with stable traffic splits and z-test promotion.
//! - **Persistence** ([`database`]): a repository trait with a SQLite
//!   implementation and an in-memory test double.
//!
//! ## Quick start
//!
//! ```no_run
//! use lead_engine::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut server = LeadEngineServer::builder()
//!         .with_database_path("leads.db")
//!         .build()
//!         .await?;
//!     server.start().await?;
//!     server.run().await
//! }
//! ```

pub mod agent;
pub mod api;
pub mod assignment;
pub mod capacity;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod lead;
pub mod matching;
pub mod prelude;
pub mod queue;
pub mod routing;
pub mod scoring;
pub mod server;

pub use config::LeadEngineConfig;
pub use engine::LeadEngine;
pub use error::{LeadEngineError, Result};
pub use server::{LeadEngineServer, LeadEngineServerBuilder};
