use serde::{Deserialize, Serialize};
use std::fmt;

/// A probability-like value constrained to `[0.0, 1.0]`.
///
/// Constructing one out of range is a compile-time-enforced impossibility
/// past `UnitInterval::new` — every reader downstream of this type can
/// assume the invariant already holds instead of re-checking it.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UnitInterval(f64);

impl UnitInterval {
    pub fn new(v: f64) -> Result<Self, UnitIntervalError> {
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            return Err(UnitIntervalError(v));
        }
        Ok(Self(v))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for UnitInterval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = f64::deserialize(deserializer)?;
        UnitInterval::new(v).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("value {0} is not in [0.0, 1.0]")]
pub struct UnitIntervalError(f64);

impl fmt::Display for UnitInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// A network/device endpoint. `device_id` is always the keyed hash of the
/// raw identifier produced by the normalizer — raw ids never leave the
/// edge host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl Endpoint {
    pub fn unspecified() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: None,
            device_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    pub score: UnitInterval,
    pub conf: UnitInterval,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtoInfo {
    pub l7: String,
}

/// The Unified Event Record: the wire and on-disk unit produced at the
/// edge and consumed by the cloud platform.
///
/// `extra` captures any top-level field this build doesn't know about so a
/// record round-trips forward-compatibly through a component running an
/// older schema version (§9 Design Notes: "JSON encoders/decoders must
/// preserve unknown fields forward-compatibly").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Uer {
    pub uid: String,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub proto: ProtoInfo,
    pub stats: std::collections::BTreeMap<String, f64>,
    pub detector: Detector,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub attck_hint: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub late: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_ts: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub const UER_SCHEMA_VERSION: &str = "uer-v1.1";
pub const AFL_SCHEMA_VERSION: &str = "afl-v1.1";

/// Per-agent policy synthesized by AFL and applied at the edge. Newest
/// `ts` wins per agent tag (§3 Policy lifecycle).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub agent: String,
    pub thresholds: Thresholds,
    pub sampling: Sampling,
    pub trust: Trust,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub schema: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Clamped to `[0.5, 0.9]` by the AFL policy synthesis formula (§4.8).
    pub score_alert: f64,
    /// Read-only hint from AFL's independent hysteresis recalibration pass
    /// (§4.8); not applied automatically, carried for observability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recalibrated_hint: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    /// Clamped to `[0.5, 1.0]`.
    pub rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trust {
    /// Clamped to `[0.0, 1.0]`.
    pub w: f64,
    /// Clamped to `[0.0, 1.0]`.
    pub decay: f64,
}
