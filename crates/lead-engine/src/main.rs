//! Lead engine server binary

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lead_engine::config::LeadEngineConfig;
use lead_engine::server::LeadEngineServer;

#[derive(Parser, Debug)]
#[command(name = "lead-engine-server", about = "Lead assignment engine", version)]
struct Args {
    /// Address the HTTP API listens on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: std::net::SocketAddr,

    /// SQLite database path (`:memory:` for ephemeral)
    #[arg(long, default_value = "lead_engine.db")]
    database: String,

    /// Seconds between queue sweep passes
    #[arg(long, default_value_t = 5)]
    sweep_interval: u64,

    /// Default minutes-to-deadline threshold for SLA risk reporting
    #[arg(long, default_value_t = 60)]
    sla_threshold: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = LeadEngineConfig::default();
    config.general.listen_addr = args.listen;
    config.database.database_path = args.database;
    config.queues.sweep_interval_secs = args.sweep_interval;
    config.queues.sla_risk_threshold_minutes = args.sla_threshold;

    info!(listen = %config.general.listen_addr, db = %config.database.database_path, "starting lead engine");

    let mut server = LeadEngineServer::builder().with_config(config).build().await?;
    server.start().await?;
    server.run().await?;

    info!("lead engine stopped");
    Ok(())
}
