//! Server assembly and background loops
//!
//! [`LeadEngineServer`] owns the HTTP listener plus three background
//! loops: the queue sweep (expires stale assignments, then drains
//! reassignment, hot, and active queues through the router), the SLA
//! monitor (logs leads whose
//! deadline is near), and a coarse stats monitor. `stop()` aborts all
//! of them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api;
use crate::config::LeadEngineConfig;
use crate::database::LeadStore;
use crate::engine::LeadEngine;
use crate::error::{LeadEngineError, Result};
use crate::queue::QueueType;

/// Builder for [`LeadEngineServer`]
pub struct LeadEngineServerBuilder {
    config: LeadEngineConfig,
    store: Option<Arc<dyn LeadStore>>,
}

impl LeadEngineServerBuilder {
    pub fn new() -> Self {
        Self {
            config: LeadEngineConfig::default(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: LeadEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.config.database.database_path = path.into();
        self
    }

    pub fn with_in_memory_database(mut self) -> Self {
        self.config.database.database_path = ":memory:".to_string();
        self
    }

    /// Use an externally built store instead of opening SQLite.
    pub fn with_store(mut self, store: Arc<dyn LeadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<LeadEngineServer> {
        let engine = match self.store {
            Some(store) => LeadEngine::with_store(self.config, store)?,
            None => LeadEngine::new(self.config).await?,
        };
        Ok(LeadEngineServer {
            engine: Arc::new(engine),
            tasks: Vec::new(),
        })
    }
}

impl Default for LeadEngineServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The running server: HTTP API plus background loops
pub struct LeadEngineServer {
    engine: Arc<LeadEngine>,
    tasks: Vec<JoinHandle<()>>,
}

impl LeadEngineServer {
    pub fn builder() -> LeadEngineServerBuilder {
        LeadEngineServerBuilder::new()
    }

    pub fn engine(&self) -> Arc<LeadEngine> {
        self.engine.clone()
    }

    /// Bind the listener and spawn the HTTP server and background
    /// loops. Returns once everything is running.
    pub async fn start(&mut self) -> Result<()> {
        let addr = self.engine.config().general.listen_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| LeadEngineError::internal(format!("bind {addr}: {e}")))?;
        info!(%addr, "lead engine API listening");

        let router = api::router(self.engine.clone());
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "HTTP server exited");
            }
        }));

        self.tasks.push(Self::spawn_queue_sweep(self.engine.clone()));
        self.tasks.push(Self::spawn_sla_monitor(self.engine.clone()));
        self.tasks.push(Self::spawn_stats_monitor(self.engine.clone()));
        info!("lead engine server started");
        Ok(())
    }

    fn spawn_queue_sweep(engine: Arc<LeadEngine>) -> JoinHandle<()> {
        let interval = engine.config().queues.sweep_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                ticker.tick().await;
                // Stale offers release their capacity before the sweep
                // hands out new ones.
                match engine.expire_assignments().await {
                    Ok(0) => {}
                    Ok(expired) => info!(expired, "sweep expired stale assignments"),
                    Err(err) => warn!(%err, "assignment expiry failed"),
                }
                for queue in QueueType::ROUTABLE {
                    match engine.process_queue(queue, None).await {
                        Ok(0) => {}
                        Ok(assigned) => info!(%queue, assigned, "sweep routed leads"),
                        Err(err) => warn!(%queue, %err, "queue sweep failed"),
                    }
                }
            }
        })
    }

    fn spawn_sla_monitor(engine: Arc<LeadEngine>) -> JoinHandle<()> {
        let interval = engine.config().queues.sla_monitor_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                ticker.tick().await;
                match engine.rescore_all().await {
                    Ok(0) => {}
                    Ok(changed) => info!(changed, "periodic rescore moved leads"),
                    Err(err) => warn!(%err, "periodic rescore failed"),
                }
                match engine.sla_at_risk(None).await {
                    Ok(leads) if leads.is_empty() => {}
                    Ok(leads) => {
                        for lead in &leads {
                            warn!(
                                lead = %lead.id,
                                tier = %lead.tier,
                                remaining_min = lead.sla_remaining_minutes(chrono::Utc::now()),
                                "lead approaching SLA deadline"
                            );
                        }
                    }
                    Err(err) => warn!(%err, "SLA monitor failed"),
                }
            }
        })
    }

    fn spawn_stats_monitor(engine: Arc<LeadEngine>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                match engine.stats().await {
                    Ok(stats) => {
                        let depths: Vec<String> = stats
                            .queues
                            .iter()
                            .map(|q| format!("{}={}", q.queue, q.depth))
                            .collect();
                        info!(
                            open_leads = stats.open_leads,
                            agents = stats.agents,
                            available = stats.available_agents,
                            queues = %depths.join(" "),
                            "engine status"
                        );
                    }
                    Err(err) => warn!(%err, "stats monitor failed"),
                }
            }
        })
    }

    /// Abort every spawned task.
    pub async fn stop(&mut self) {
        info!("stopping lead engine server");
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Run until interrupted.
    pub async fn run(&mut self) -> Result<()> {
        if self.tasks.is_empty() {
            self.start().await?;
        }
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| LeadEngineError::internal(format!("signal handler: {e}")))?;
        self.stop().await;
        Ok(())
    }
}
