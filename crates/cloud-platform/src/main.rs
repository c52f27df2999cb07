use comidf_cloud_platform::{
    build_router, AdminRegistry, AflEngine, AppState, CloudConfig, GlobalCorrelator,
    InMemoryIdempotencyCache, LoggingPublisher, PolicyResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or("comidf_cloud_platform=info,tower_http=info".into()))
        .json()
        .init();

    let config_path = std::env::var("CLOUD_CONFIG").unwrap_or_else(|_| "cloud.toml".to_string());
    let config = CloudConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("[warn] could not load cloud config from {config_path}: {e}, using defaults");
        CloudConfig {
            ingress: Default::default(),
            gc: Default::default(),
            policy: Default::default(),
            afl: Default::default(),
        }
    });

    let correlator = Arc::new(GlobalCorrelator::new(config.gc.trust_alpha));
    let policy_response = Arc::new(PolicyResponse::new(config.policy.clone()));
    let afl = Arc::new(AflEngine::new(correlator.clone(), config.afl.recalibration_rate));
    let admin = Arc::new(AdminRegistry::new());

    let state = AppState {
        publisher: Arc::new(LoggingPublisher::new(correlator.clone())),
        cache: Arc::new(InMemoryIdempotencyCache::new(config.ingress.idempotency_ttl_secs)),
        admin,
        afl: afl.clone(),
    };

    spawn_window_closer(correlator.clone(), policy_response.clone(), config.gc.window_size_sec);
    spawn_afl_update_tick(afl.clone(), config.afl.update_interval_sec);

    let port = config.ingress.port;
    let app = build_router(state).layer(
        tower_http::trace::TraceLayer::new_for_http(),
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "comidf cloud platform listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("[FATAL] could not bind {addr}: {e}");
        std::process::exit(1);
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown");
        })
        .await
        .unwrap_or_else(|e| {
            eprintln!("[FATAL] server error: {e}");
            std::process::exit(1);
        });
}

/// On each configured update interval, synthesizes and logs a policy for
/// every agent with recorded outcomes so far (§4.8: "on each configured
/// update interval... OR on demand"). The on-demand path is the
/// `GET /afl/feedback/:tenant/:agent` route edges poll (§4.9); this tick
/// is the independent interval-driven half of the same requirement, run
/// regardless of whether any edge happens to be polling right now.
fn spawn_afl_update_tick(afl: Arc<AflEngine>, update_interval_sec: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(update_interval_sec));
        loop {
            interval.tick().await;
            for agent in afl.known_agents() {
                let policy = afl.generate_policy(&agent, 0.5);
                info!(agent = %policy.agent, threshold = policy.thresholds.score_alert, "afl_policy_synthesized");
            }
        }
    });
}

/// Closes every tenant's open window on a fixed cadence and runs it
/// through Policy & Response, logging the resulting alert (§4.6/§4.7).
fn spawn_window_closer(
    correlator: Arc<GlobalCorrelator>,
    policy_response: Arc<PolicyResponse>,
    window_size_sec: u64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(window_size_sec));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            for tenant in correlator.open_tenants() {
                if let Some(result) = correlator.close_window(&tenant, now) {
                    let alert = policy_response.evaluate(&result);
                    info!(
                        tenant = %alert.tenant,
                        action = ?alert.action,
                        severity = ?alert.severity,
                        alert_id = %alert.alert_id,
                        "alert_emitted"
                    );
                }
            }
        }
    });
}
