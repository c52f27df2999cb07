//! Typed cloud-platform configuration, matching the nested `ingress.*`,
//! `gc.*`, `policy.*`, `afl.*` keys described in §6 for the cloud side.

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub gc: CorrelatorConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub afl: AflConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
}

fn default_port() -> u16 {
    8443
}
fn default_idempotency_ttl_secs() -> u64 {
    24 * 3600
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CorrelatorConfig {
    #[serde(default = "default_window_size_sec")]
    pub window_size_sec: u64,
    #[serde(default = "default_trust_alpha")]
    pub trust_alpha: f64,
}

fn default_window_size_sec() -> u64 {
    5
}
fn default_trust_alpha() -> f64 {
    0.9
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            window_size_sec: default_window_size_sec(),
            trust_alpha: default_trust_alpha(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_action_threshold")]
    pub action_threshold: f64,
    #[serde(default = "default_true")]
    pub two_step_validation: bool,
}

fn default_alert_threshold() -> f64 {
    0.6
}
fn default_action_threshold() -> f64 {
    0.85
}
fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            action_threshold: default_action_threshold(),
            two_step_validation: default_true(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AflConfig {
    #[serde(default = "default_update_interval_sec")]
    pub update_interval_sec: u64,
    #[serde(default = "default_recalibration_rate")]
    pub recalibration_rate: f64,
}

fn default_update_interval_sec() -> u64 {
    300
}
fn default_recalibration_rate() -> f64 {
    0.1
}

impl Default for AflConfig {
    fn default() -> Self {
        Self {
            update_interval_sec: default_update_interval_sec(),
            recalibration_rate: default_recalibration_rate(),
        }
    }
}

impl CloudConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {path}: {e}"))?;
        Ok(toml::from_str(&raw)?)
    }
}
