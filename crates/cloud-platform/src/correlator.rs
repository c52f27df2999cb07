//! Global Correlator (C6): tumbling-window, trust-weighted Bayesian fusion
//! with Dempster-Shafer belief/plausibility bounds. Grounded on
//! `original_source/cloud-platform/services/gc.py` (fusion, trust update,
//! `defaultdict(lambda: 0.7)` agent trust) and
//! `original_source/cloud_platform/gc/global_credibility.py`
//! (belief = score*trust, plausibility = score, conflict flag, bounded
//! accuracy history).

use chrono::{DateTime, Utc};
use comidf_uer::Uer;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

const ACCURACY_HISTORY_CAP: usize = 100;
const DEFAULT_TRUST_WEIGHT: f64 = 0.7;
const HIGH_CONFLICT_CONF_THRESHOLD: f64 = 0.5;

/// Per-protocol-tag trust state. Mutated only by `update_trust`; read by GC
/// fusion and by AFL's hysteresis recalibration over the same history.
#[derive(Clone, Debug)]
pub struct AgentTrust {
    pub weight: f64,
    pub accuracy_history: VecDeque<f64>,
}

impl Default for AgentTrust {
    fn default() -> Self {
        Self {
            weight: DEFAULT_TRUST_WEIGHT,
            accuracy_history: VecDeque::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct WindowEvent {
    proto: String,
    score: f64,
    conf: f64,
    stats: BTreeMap<String, f64>,
    attck_hint: Vec<String>,
    entities: Vec<String>,
    site: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct FeatureStat {
    pub name: String,
    pub mean: f64,
    pub variance: f64,
}

#[derive(Clone, Debug)]
pub struct GcResult {
    pub window_key: String,
    pub tenant: String,
    pub site: Option<String>,
    pub posterior: f64,
    pub uncertainty: f64,
    pub confidence: f64,
    pub agent_count: usize,
    pub agents: BTreeSet<String>,
    pub top_features: Vec<FeatureStat>,
    pub attck_hint: Vec<String>,
    pub entities: Vec<String>,
    pub belief: f64,
    pub plausibility: f64,
    pub high_conflict: bool,
    pub ts: DateTime<Utc>,
}

pub struct GlobalCorrelator {
    trust_alpha: f64,
    trust: DashMap<String, AgentTrust>,
    windows: DashMap<String, Vec<WindowEvent>>,
}

impl GlobalCorrelator {
    pub fn new(trust_alpha: f64) -> Self {
        Self {
            trust_alpha,
            trust: DashMap::new(),
            windows: DashMap::new(),
        }
    }

    fn trust_weight(&self, proto: &str) -> f64 {
        self.trust.entry(proto.to_string()).or_default().weight
    }

    /// Appends a UER to the tenant's open window. Called from the ingress
    /// forward step in lieu of a real broker subscription.
    pub fn push(&self, tenant: &str, uer: &Uer) {
        let event = WindowEvent {
            proto: uer.proto.l7.to_lowercase(),
            score: uer.detector.score.get(),
            conf: uer.detector.conf.get(),
            stats: uer.stats.clone(),
            attck_hint: uer.attck_hint.clone(),
            entities: uer.entities.clone(),
            site: uer.site.clone(),
        };
        self.windows.entry(tenant.to_string()).or_default().push(event);
    }

    /// Closes the tenant's current window, returning a `GcResult` unless
    /// the window was empty (§4.6 edge case: empty window → skip emission).
    pub fn close_window(&self, tenant: &str, window_start: DateTime<Utc>) -> Option<GcResult> {
        let events = {
            let mut entry = self.windows.entry(tenant.to_string()).or_default();
            std::mem::take(entry.value_mut())
        };
        if events.is_empty() {
            return None;
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut confs = Vec::with_capacity(events.len());
        let mut agents = BTreeSet::new();
        let mut beliefs = Vec::with_capacity(events.len());
        let mut plausibilities = Vec::with_capacity(events.len());
        let mut feature_samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut attck_hint = BTreeSet::new();
        let mut entities = BTreeSet::new();
        let mut site = None;

        for ev in &events {
            let w = self.trust_weight(&ev.proto);
            weighted_sum += ev.score * w;
            total_weight += w;
            confs.push(ev.conf);
            agents.insert(ev.proto.clone());
            beliefs.push(ev.score * w);
            plausibilities.push(ev.score);
            for (k, v) in &ev.stats {
                feature_samples.entry(k.clone()).or_default().push(*v);
            }
            attck_hint.extend(ev.attck_hint.iter().cloned());
            entities.extend(ev.entities.iter().cloned());
            if site.is_none() {
                site = ev.site.clone();
            }
        }

        let posterior = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };
        let avg_conf = confs.iter().sum::<f64>() / confs.len() as f64;
        let uncertainty = 1.0 - avg_conf;

        let mut top_features: Vec<FeatureStat> = feature_samples
            .into_iter()
            .filter(|(_, values)| values.len() >= 2)
            .map(|(name, values)| {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
                FeatureStat { name, mean, variance }
            })
            .collect();
        top_features.sort_by(|a, b| b.variance.partial_cmp(&a.variance).unwrap());
        top_features.truncate(5);

        let belief = beliefs.iter().cloned().fold(f64::INFINITY, f64::min);
        let plausibility = plausibilities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let low_conf_count = confs.iter().filter(|c| **c < HIGH_CONFLICT_CONF_THRESHOLD).count();
        let high_conflict = low_conf_count * 2 > events.len();

        Some(GcResult {
            window_key: format!("{tenant}:{}", window_start.timestamp()),
            tenant: tenant.to_string(),
            site,
            posterior,
            uncertainty,
            confidence: avg_conf,
            agent_count: events.len(),
            agents,
            top_features,
            attck_hint: attck_hint.into_iter().collect(),
            entities: entities.into_iter().collect(),
            belief,
            plausibility,
            high_conflict,
            ts: Utc::now(),
        })
    }

    /// `w_new = alpha * w_old + (1 - alpha) * accuracy` (§4.6). Also feeds
    /// the bounded (cap 100) accuracy history AFL's hysteresis pass reads.
    pub fn update_trust(&self, proto: &str, accuracy: f64) {
        let mut entry = self.trust.entry(proto.to_string()).or_default();
        entry.weight = self.trust_alpha * entry.weight + (1.0 - self.trust_alpha) * accuracy;
        entry.accuracy_history.push_back(accuracy);
        while entry.accuracy_history.len() > ACCURACY_HISTORY_CAP {
            entry.accuracy_history.pop_front();
        }
    }

    pub fn trust_snapshot(&self, proto: &str) -> AgentTrust {
        self.trust.entry(proto.to_string()).or_default().clone()
    }

    /// Tenants with at least one event in their currently-open window.
    /// Used by the ticking task that closes windows on a fixed cadence
    /// rather than per-tenant timers.
    pub fn open_tenants(&self) -> Vec<String> {
        self.windows
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }
}
