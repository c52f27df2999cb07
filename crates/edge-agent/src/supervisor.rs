//! Edge Supervisor (C4): owns the protocol agents, the connector, the
//! buffer, the feedback handler, and the background flush loop. Grounded
//! on the `tokio::spawn`-per-worker pattern with `CancellationToken`-gated
//! shutdown, and `original_source/edge_agent/main.py`'s per-agent task
//! loop.

use crate::agents::ProtocolAgent;
use crate::buffer::DurableBuffer;
use crate::config::EdgeConfig;
use crate::connector::SecureConnector;
use crate::feedback::FeedbackHandler;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use comidf_uer::{Normalizer, Policy};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct EdgeSupervisor {
    pub config: Arc<EdgeConfig>,
    pub buffer: Arc<DurableBuffer>,
    pub connector: Arc<SecureConnector>,
    pub feedback: Arc<FeedbackHandler>,
    pub normalizer: Arc<Normalizer>,
}

#[derive(Clone)]
struct LocalApiState {
    buffer: Arc<DurableBuffer>,
    feedback: Arc<FeedbackHandler>,
}

impl EdgeSupervisor {
    pub fn new(config: EdgeConfig, buffer: DurableBuffer, connector: SecureConnector, feedback: FeedbackHandler) -> Self {
        let salt = config.privacy.id_salt.clone();
        Self {
            config: Arc::new(config),
            buffer: Arc::new(buffer),
            connector: Arc::new(connector),
            feedback: Arc::new(feedback),
            normalizer: Arc::new(Normalizer::new(salt)),
        }
    }

    /// Launches each enabled agent as an independent worker, a 60s flush
    /// worker, the local HTTP surface, and a 60s feedback-poll worker.
    /// Returns once `shutdown` fires and every worker has joined (within
    /// the 5s grace period) or been abandoned with a warning.
    pub async fn run(
        self: Arc<Self>,
        mut agents: Vec<Box<dyn ProtocolAgent>>,
        shutdown: CancellationToken,
    ) {
        self.feedback.load().ok();

        let mut handles = Vec::new();

        for mut agent in agents.drain(..) {
            let sup = self.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let tag = agent.tag().to_string();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {
                            sup.run_agent_once(agent.as_mut(), &tag).await;
                        }
                    }
                }
            }));
        }

        {
            let sup = self.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut iv = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = iv.tick() => {
                            match sup.connector.flush_buffer(&sup.buffer, sup.config.buffer.flush_batch).await {
                                Ok(report) => info!(?report, "flush_tick"),
                                Err(e) => warn!(error = %e, "flush_tick_failed"),
                            }
                        }
                    }
                }
            }));
        }

        {
            let sup = self.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move { sup.run_local_api(token).await }));
        }

        {
            let sup = self.clone();
            let token = shutdown.clone();
            let tags: Vec<String> = sup
                .config
                .agents
                .iter()
                .filter(|(_, toggle)| toggle.enabled)
                .map(|(tag, _)| tag.clone())
                .collect();
            handles.push(tokio::spawn(async move {
                let mut iv = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = iv.tick() => sup.poll_feedback(&tags).await,
                    }
                }
            }));
        }

        shutdown.cancelled().await;
        for h in handles {
            if tokio::time::timeout(Duration::from_secs(5), h).await.is_err() {
                warn!("worker_did_not_join_within_grace_period");
            }
        }
        info!("edge_supervisor_stopped");
    }

    async fn run_agent_once(&self, agent: &mut dyn ProtocolAgent, tag: &str) {
        let (raw, det) = agent.collect();
        let threshold = self.feedback.get_threshold(tag);
        if det.score < threshold {
            return;
        }
        let uer = match self.normalizer.normalize(
            tag,
            &raw,
            &det,
            Some(self.config.agent.tenant_id.clone()),
            self.config.agent.site.clone(),
        ) {
            Ok(uer) => uer,
            Err(e) => {
                warn!(agent = tag, error = %e, "normalize_failed_dropping_event");
                return;
            }
        };
        match self.connector.send(&self.buffer, &uer).await {
            Ok(outcome) => info!(uid = %uer.uid, ?outcome, "agent_event_sent"),
            Err(e) => warn!(uid = %uer.uid, error = %e, "buffer_error_event_lost"),
        }
    }

    /// Feedback poll/subscribe task (§5): pulls each enabled agent's latest
    /// policy from the cloud and applies it through the same idempotent
    /// `apply_policy` path a local push would use. A single agent's fetch
    /// failing (network blip, cloud restart) never blocks the others.
    async fn poll_feedback(&self, tags: &[String]) {
        for tag in tags {
            match self.connector.pull_policy(tag, 0.5).await {
                Ok(policy) => {
                    if let Err(e) = self.feedback.apply_policy(policy) {
                        warn!(agent = %tag, error = %e, "feedback_poll_apply_failed");
                    }
                }
                Err(e) => warn!(agent = %tag, error = %e, "feedback_poll_failed"),
            }
        }
    }

    async fn run_local_api(&self, shutdown: CancellationToken) {
        let state = LocalApiState {
            buffer: self.buffer.clone(),
            feedback: self.feedback.clone(),
        };
        let app = Router::new()
            .route("/health", get(health))
            .route("/config", get(config_snapshot))
            .route("/feedback/apply", post(feedback_apply))
            .with_state(state);

        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.config.local_api.port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!(%addr, error = %e, "local_api_bind_failed");
                return;
            }
        };
        info!(%addr, "local_api_listening");
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Serialize)]
struct ConfigSnapshot {
    queue_size: usize,
    dlq_size: usize,
}

async fn config_snapshot(State(s): State<LocalApiState>) -> Json<ConfigSnapshot> {
    Json(ConfigSnapshot {
        queue_size: s.buffer.size().unwrap_or(0),
        dlq_size: s.buffer.dlq_size().unwrap_or(0),
    })
}

async fn feedback_apply(State(s): State<LocalApiState>, Json(policy): Json<Policy>) -> axum::http::StatusCode {
    match s.feedback.apply_policy(policy) {
        Ok(()) => axum::http::StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "feedback_apply_failed");
            axum::http::StatusCode::BAD_REQUEST
        }
    }
}
