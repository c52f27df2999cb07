//! Typed edge configuration, matching the nested keys fixed by §6:
//! `agent.*`, `uplink.*`, `buffer.*`, `privacy.*`, `agents.<tag>.*`.
//!
//! Loaded from a TOML file and overridden by the handful of environment
//! variables read directly (`EDGE_LOCAL_API_PORT`, `RUST_LOG`).

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Deserialize)]
pub struct EdgeConfig {
    pub agent: AgentIdentity,
    #[serde(default)]
    pub uplink: Uplink,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentToggle>,
    #[serde(default)]
    pub local_api: LocalApi,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub site: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Uplink {
    pub mssp_url: String,
    #[serde(default = "default_fal_endpoint")]
    pub fal_endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub tls: Tls,
    #[serde(default)]
    pub retry: Retry,
}

fn default_fal_endpoint() -> String {
    "/api/fal/uer".to_string()
}

impl Default for Uplink {
    fn default() -> Self {
        Self {
            mssp_url: String::new(),
            fal_endpoint: default_fal_endpoint(),
            token: String::new(),
            tls: Tls::default(),
            retry: Retry::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Tls {
    #[serde(default)]
    pub mtls: bool,
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_true")]
    pub verify: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct Retry {
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_backoff_ms() -> Vec<u64> {
    vec![200, 500, 1000, 2000]
}
fn default_max_retries() -> usize {
    8
}
fn default_timeout_seconds() -> u64 {
    30
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_buffer_path")]
    pub path: String,
    #[serde(default = "default_flush_batch")]
    pub flush_batch: usize,
    #[serde(default = "default_max_mb")]
    pub max_mb: u64,
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_buffer_path() -> String {
    "edge_buffer.sqlite3".to_string()
}
fn default_flush_batch() -> usize {
    500
}
fn default_max_mb() -> u64 {
    256
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_buffer_path(),
            flush_batch: default_flush_batch(),
            max_mb: default_max_mb(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Privacy {
    #[serde(default)]
    pub id_salt: String,
    #[serde(default)]
    pub strip_fields: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AgentToggle {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub thresholds: AgentThresholds,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AgentThresholds {
    #[serde(default = "default_score_alert")]
    pub score_alert: f64,
}

fn default_score_alert() -> f64 {
    0.7
}

#[derive(Clone, Debug, Deserialize)]
pub struct LocalApi {
    #[serde(default = "default_local_port")]
    pub port: u16,
}

fn default_local_port() -> u16 {
    8088
}

impl Default for LocalApi {
    fn default() -> Self {
        Self {
            port: default_local_port(),
        }
    }
}

impl EdgeConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {path}: {e}"))?;
        let mut cfg: EdgeConfig = toml::from_str(&raw)?;
        if let Ok(port) = std::env::var("EDGE_LOCAL_API_PORT") {
            if let Ok(p) = port.parse() {
                cfg.local_api.port = p;
            }
        }
        Ok(cfg)
    }

    pub fn threshold_for(&self, agent_tag: &str) -> f64 {
        self.agents
            .get(agent_tag)
            .map(|a| a.thresholds.score_alert)
            .unwrap_or_else(default_score_alert)
    }
}
