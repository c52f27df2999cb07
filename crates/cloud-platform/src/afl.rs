//! Active Feedback Loop (C8): per-agent precision/recall tracking, policy
//! synthesis, and hysteresis-based local recalibration. Grounded on
//! `original_source/cloud-platform/services/afl.py` (precision-driven
//! policy synthesis) and `original_source/cloud_platform/afl/feedback_loop.py`
//! (hysteresis recalibration over accuracy history). Per the Design Notes
//! Open Question, both signals are unified here: `generate_policy` is the
//! canonical per-agent `Policy`; `recalibrate` exposes the independent
//! hysteresis threshold as a secondary hint.

use crate::correlator::GlobalCorrelator;
use chrono::Utc;
use comidf_uer::{Policy, Sampling, Thresholds, Trust, AFL_SCHEMA_VERSION};
use dashmap::DashMap;
use std::sync::Arc;

const BASE_THRESHOLD: f64 = 0.7;
const DEFAULT_PRECISION: f64 = 0.5;
const DEFAULT_RECALL: f64 = 0.5;
const RECALIBRATION_MIN_OBSERVATIONS: usize = 10;
const RECALIBRATION_LOW_MEAN: f64 = 0.6;
const RECALIBRATION_HIGH_MEAN: f64 = 0.9;
const RECALIBRATION_CLAMP: (f64, f64) = (0.3, 0.95);

#[derive(Clone, Copy, Debug, Default)]
pub struct Counters {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_count: u64,
}

impl Counters {
    fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 {
            DEFAULT_PRECISION
        } else {
            self.tp as f64 / denom as f64
        }
    }

    fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_count;
        if denom == 0 {
            DEFAULT_RECALL
        } else {
            self.tp as f64 / denom as f64
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

pub struct AflEngine {
    correlator: Arc<GlobalCorrelator>,
    counters: DashMap<String, Counters>,
    recalibration_rate: f64,
}

impl AflEngine {
    pub fn new(correlator: Arc<GlobalCorrelator>, recalibration_rate: f64) -> Self {
        Self {
            correlator,
            counters: DashMap::new(),
            recalibration_rate,
        }
    }

    /// Agent tags with at least one recorded outcome so far. Used by the
    /// update-interval tick (§4.8: "on each configured update interval...
    /// synthesizes a policy per agent") to know which agents to (re)publish
    /// without waiting for an edge to pull one.
    pub fn known_agents(&self) -> Vec<String> {
        self.counters.iter().map(|e| e.key().clone()).collect()
    }

    pub fn record_outcome(&self, agent: &str, outcome: Outcome) {
        let mut entry = self.counters.entry(agent.to_string()).or_default();
        match outcome {
            Outcome::TruePositive => entry.tp += 1,
            Outcome::FalsePositive => entry.fp += 1,
            Outcome::TrueNegative => entry.tn += 1,
            Outcome::FalseNegative => entry.fn_count += 1,
        }
    }

    /// Synthesizes the per-agent policy per §4.8's precision/recall/load
    /// formulas. `load` is the agent's current normalized ingestion load
    /// in [0,1], supplied by the caller (this repo has no real backlog
    /// metric; callers pass an observed or assumed value).
    pub fn generate_policy(&self, agent: &str, load: f64) -> Policy {
        let counters = *self.counters.entry(agent.to_string()).or_default();
        let precision = counters.precision();
        let recall = counters.recall();

        let threshold = (BASE_THRESHOLD - (precision - 0.5) * 0.3 + (recall - 0.5) * 0.2).clamp(0.5, 0.9);
        let sampling_rate = (1.0 - (load - 0.5) * 0.3).clamp(0.5, 1.0);
        let trust_w = (0.5 + precision * 0.4).clamp(0.0, 1.0);

        let recalibrated_hint = self.recalibrate(agent);

        Policy {
            agent: agent.to_string(),
            thresholds: Thresholds {
                score_alert: round2(threshold),
                recalibrated_hint: recalibrated_hint.map(round2),
            },
            sampling: Sampling { rate: round2(sampling_rate) },
            trust: Trust {
                w: round2(trust_w),
                decay: 0.9,
            },
            ts: Utc::now(),
            schema: AFL_SCHEMA_VERSION.to_string(),
        }
    }

    /// Independent hysteresis pass over GC's bounded accuracy history:
    /// after >=10 observations, raise by `recalibration_rate` if the mean
    /// is below 0.6, lower if above 0.9, otherwise hold. `None` until
    /// enough observations exist.
    pub fn recalibrate(&self, agent: &str) -> Option<f64> {
        let trust = self.correlator.trust_snapshot(agent);
        if trust.accuracy_history.len() < RECALIBRATION_MIN_OBSERVATIONS {
            return None;
        }
        let mean = trust.accuracy_history.iter().sum::<f64>() / trust.accuracy_history.len() as f64;
        let mut threshold = BASE_THRESHOLD;
        if mean < RECALIBRATION_LOW_MEAN {
            threshold += self.recalibration_rate;
        } else if mean > RECALIBRATION_HIGH_MEAN {
            threshold -= self.recalibration_rate;
        }
        Some(threshold.clamp(RECALIBRATION_CLAMP.0, RECALIBRATION_CLAMP.1))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
