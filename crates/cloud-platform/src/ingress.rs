//! Cloud Ingress (C5): the HTTP front door. Grounded on
//! `original_source/cloud-platform/services/ingress.py` (Flask + mock
//! Kafka/Redis), re-architected per the Design Notes (§9) as an `axum`
//! `Router` built from injected `Publisher`/`IdempotencyCache`
//! collaborators rather than module-global mocks.

use crate::admin::AdminRegistry;
use crate::afl::{AflEngine, Outcome};
use crate::correlator::GlobalCorrelator;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let code = StatusCode::BAD_REQUEST;
        (code, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// The tenant event stream the cloud ingress forwards accepted UERs to.
/// Modeled as a trait so a real broker (Kafka/NATS/etc.) is a drop-in.
pub trait Publisher: Send + Sync {
    fn publish(&self, tenant: &str, uer: &comidf_uer::Uer);
}

/// Advisory SETEX/GET-shaped idempotency cache keyed by uid.
pub trait IdempotencyCache: Send + Sync {
    /// Returns `true` if `uid` was newly inserted (i.e. this is the first
    /// time it's been seen within the TTL window).
    fn check_and_insert(&self, uid: &str) -> bool;
}

/// In-process fan-out standing in for the broker-agnostic event stream
/// (§9: "broker-agnostic event stream").
pub struct LoggingPublisher {
    correlator: Arc<GlobalCorrelator>,
}

impl LoggingPublisher {
    pub fn new(correlator: Arc<GlobalCorrelator>) -> Self {
        Self { correlator }
    }
}

impl Publisher for LoggingPublisher {
    fn publish(&self, tenant: &str, uer: &comidf_uer::Uer) {
        info!(tenant, uid = %uer.uid, "uer.ingest.{tenant}");
        self.correlator.push(tenant, uer);
    }
}

pub struct InMemoryIdempotencyCache {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl InMemoryIdempotencyCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            seen: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }
}

impl IdempotencyCache for InMemoryIdempotencyCache {
    fn check_and_insert(&self, uid: &str) -> bool {
        let now = Instant::now();
        if let Some(expiry) = self.seen.get(uid) {
            if now.duration_since(*expiry.value()) < self.ttl {
                return false;
            }
        }
        self.seen.insert(uid.to_string(), now);
        true
    }
}

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn Publisher>,
    pub cache: Arc<dyn IdempotencyCache>,
    pub admin: Arc<AdminRegistry>,
    pub afl: Arc<AflEngine>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/fal/uer", post(ingest_single))
        .route("/api/fal/uer/_bulk", post(ingest_bulk))
        .route("/afl/feedback/:tenant/:agent", get(pull_policy))
        .route("/afl/outcome/:agent", post(record_outcome))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Deserialize)]
struct LoadQuery {
    #[serde(default = "default_load")]
    load: f64,
}

fn default_load() -> f64 {
    0.5
}

/// Edge-pollable equivalent of the logical `afl.feedback.{tenant}` stream
/// (§6), grounded on `original_source/cloud-platform/services/afl.py`'s
/// `pull_policy`.
async fn pull_policy(
    State(state): State<AppState>,
    Path((_tenant, agent)): Path<(String, String)>,
    Query(q): Query<LoadQuery>,
) -> Json<comidf_uer::Policy> {
    Json(state.afl.generate_policy(&agent, q.load))
}

#[derive(serde::Deserialize)]
struct OutcomeBody {
    outcome: String,
}

async fn record_outcome(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    Json(body): Json<OutcomeBody>,
) -> StatusCode {
    let outcome = match body.outcome.as_str() {
        "tp" => Outcome::TruePositive,
        "fp" => Outcome::FalsePositive,
        "tn" => Outcome::TrueNegative,
        "fn" => Outcome::FalseNegative,
        _ => return StatusCode::BAD_REQUEST,
    };
    state.afl.record_outcome(&agent, outcome);
    StatusCode::OK
}

fn required_headers(headers: &HeaderMap) -> Result<(String, String), IngressError> {
    let tenant = headers
        .get("X-Tenant-ID")
        .and_then(|v| v.to_str().ok())
        .ok_or(IngressError::MissingHeader("X-Tenant-ID"))?
        .to_string();
    let agent_id = headers
        .get("X-Agent-ID")
        .and_then(|v| v.to_str().ok())
        .ok_or(IngressError::MissingHeader("X-Agent-ID"))?
        .to_string();
    Ok((tenant, agent_id))
}

/// Authenticates the bearer token against the admin registry when present.
/// Per §4.5, "token verification against the credential store is assumed;
/// not part of the core algorithm" — an absent or unrecognized token never
/// fails the request, it's just not attributable to a registered agent.
fn authenticate(headers: &HeaderMap, admin: &AdminRegistry) {
    if let Some(token) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = token.strip_prefix("Bearer ") {
            if admin.authenticate(token).is_none() {
                warn!("bearer token not recognized by admin registry");
            }
        }
    }
}

/// Checks the §4.5 required-field set, producing the exact
/// `"Missing <field>"` messages the bulk-ingest scenario expects.
fn validate_required_fields(v: &serde_json::Value) -> Result<(), String> {
    for field in ["uid", "ts", "src", "dst", "proto", "detector"] {
        if v.get(field).is_none() {
            return Err(format!("Missing {field}"));
        }
    }
    let detector = v.get("detector").unwrap();
    if detector.get("score").is_none() {
        return Err("Missing detector.score".to_string());
    }
    if detector.get("conf").is_none() {
        return Err("Missing detector.conf".to_string());
    }
    Ok(())
}

fn annotate_and_parse(
    mut v: serde_json::Value,
    tenant: &str,
    agent_id: &str,
) -> Result<comidf_uer::Uer, IngressError> {
    validate_required_fields(&v).map_err(IngressError::Validation)?;

    if let Some(obj) = v.as_object_mut() {
        obj.insert("tenant".to_string(), serde_json::Value::String(tenant.to_string()));
        obj.insert("agent_id".to_string(), serde_json::Value::String(agent_id.to_string()));
    }

    let mut uer: comidf_uer::Uer =
        serde_json::from_value(v).map_err(|e| IngressError::InvalidJson(e.to_string()))?;

    uer.ingress_ts = Some(Utc::now());
    if Utc::now() - uer.ts > ChronoDuration::hours(24) {
        uer.late = Some(true);
    }
    Ok(uer)
}

#[derive(Serialize)]
struct SingleResponse {
    status: &'static str,
    uid: String,
}

async fn ingest_single(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SingleResponse>, IngressError> {
    let (tenant, agent_id) = required_headers(&headers)?;
    authenticate(&headers, &state.admin);

    let uer = annotate_and_parse(body, &tenant, &agent_id)?;

    if !state.cache.check_and_insert(&uer.uid) {
        return Ok(Json(SingleResponse { status: "duplicate", uid: uer.uid }));
    }
    state.publisher.publish(&tenant, &uer);
    Ok(Json(SingleResponse { status: "ingested", uid: uer.uid }))
}

#[derive(Serialize)]
struct LineError {
    line: usize,
    error: String,
}

#[derive(Serialize)]
struct BulkResponse {
    ingested: u32,
    errors: Vec<LineError>,
}

async fn ingest_bulk(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<BulkResponse>, IngressError> {
    let (tenant, agent_id) = required_headers(&headers)?;
    authenticate(&headers, &state.admin);

    let mut ingested = 0u32;
    let mut errors = Vec::new();

    for (idx, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(line);
        let outcome = parsed
            .map_err(|e| e.to_string())
            .and_then(|v| annotate_and_parse(v, &tenant, &agent_id).map_err(|e| e.to_string()));

        match outcome {
            Ok(uer) => {
                if state.cache.check_and_insert(&uer.uid) {
                    state.publisher.publish(&tenant, &uer);
                }
                ingested += 1;
            }
            Err(e) => errors.push(LineError { line: idx, error: e }),
        }
    }

    Ok(Json(BulkResponse { ingested, errors }))
}
