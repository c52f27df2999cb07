use comidf_edge_agent::{DurableBuffer, EdgeConfig, EdgeSupervisor, FeedbackHandler, SecureConnector, SimulatedAgent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or("comidf_edge_agent=info,tower_http=info".into()))
        .json()
        .init();

    let config_path = std::env::var("EDGE_CONFIG").unwrap_or_else(|_| "edge.toml".to_string());
    let config = EdgeConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("[FATAL] could not load edge config from {config_path}: {e}");
        std::process::exit(1);
    });
    info!(agent_id = %config.agent.id, tenant = %config.agent.tenant_id, "comidf edge agent starting");

    let buffer = DurableBuffer::open(&config.buffer.path).unwrap_or_else(|e| {
        eprintln!("[FATAL] could not open durable buffer: {e}");
        std::process::exit(1);
    });
    let connector = SecureConnector::new(&config.uplink, &config.agent.id, &config.agent.tenant_id).unwrap_or_else(|e| {
        eprintln!("[FATAL] could not build secure connector: {e}");
        std::process::exit(1);
    });
    let feedback_path = std::path::Path::new(&config.buffer.path)
        .with_file_name("policies.json");
    let feedback = FeedbackHandler::new(feedback_path, config.threshold_for("default"));

    let agents: Vec<Box<dyn comidf_edge_agent::ProtocolAgent>> = config
        .agents
        .iter()
        .filter(|(_, toggle)| toggle.enabled)
        .map(|(tag, toggle)| {
            Box::new(SimulatedAgent::new(tag.clone(), toggle.thresholds.score_alert)) as Box<dyn comidf_edge_agent::ProtocolAgent>
        })
        .collect();
    info!(count = agents.len(), "protocol agents enabled");

    let supervisor = Arc::new(EdgeSupervisor::new(config, buffer, connector, feedback));
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    supervisor.run(agents, shutdown).await;
}
