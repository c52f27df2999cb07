//! Policy & Response (C7): maps a fused `GcResult` to an action/severity
//! decision and builds the alert record. Grounded on
//! `original_source/cloud-platform/services/pr.py`.

use crate::config::PolicyConfig;
use crate::correlator::{FeatureStat, GcResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Monitor,
    Alert,
    Isolate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub action: Action,
    pub severity: Severity,
    pub posterior: f64,
    pub uncertainty: f64,
    pub reason: String,
    pub agents: Vec<String>,
    pub tenant: String,
    pub site: Option<String>,
    pub attck_hint: Vec<String>,
    pub entities: Vec<String>,
    pub top_features: Vec<FeatureStat>,
    pub ts: DateTime<Utc>,
}

pub struct PolicyResponse {
    config: PolicyConfig,
    start: Instant,
    alert_seq: AtomicU64,
}

impl PolicyResponse {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            start: Instant::now(),
            alert_seq: AtomicU64::new(0),
        }
    }

    /// Strictly increasing even across several alerts in the same
    /// millisecond or a backward wall-clock step: nanos-since-start plus a
    /// tie-breaking sequence number, both monotonic.
    fn monotonic_millis(&self) -> u128 {
        let elapsed_nanos = self.start.elapsed().as_nanos();
        let seq = self.alert_seq.fetch_add(1, Ordering::Relaxed) as u128;
        elapsed_nanos + seq
    }

    /// Implements the §4.7 action/severity table plus the post-rule
    /// uncertainty downgrade.
    pub fn evaluate(&self, gc: &GcResult) -> Alert {
        let posterior = gc.posterior;
        let alert_thr = self.config.alert_threshold;
        let action_thr = self.config.action_threshold;

        let (action, mut severity, reason) = if posterior >= action_thr {
            if self.config.two_step_validation {
                (Action::Alert, severity_for_high(posterior), "action_threshold_two_step".to_string())
            } else {
                (Action::Isolate, severity_for_high(posterior), "action_threshold".to_string())
            }
        } else if posterior >= alert_thr {
            (Action::Alert, severity_for_medium(posterior), "alert_threshold".to_string())
        } else {
            (Action::Monitor, Severity::Low, "below_alert_threshold".to_string())
        };

        // Post-rule: uncertain evidence above alert_thr never reads as more
        // than medium severity, even if the raw posterior crossed higher
        // bands (§4.7, strict reading: applies only below action_thr).
        if gc.uncertainty > 0.5 && posterior > alert_thr && posterior < action_thr {
            severity = Severity::Medium;
        }

        Alert {
            alert_id: format!("alert-{}", self.monotonic_millis()),
            action,
            severity,
            posterior,
            uncertainty: gc.uncertainty,
            reason,
            agents: gc.agents.iter().cloned().collect(),
            tenant: gc.tenant.clone(),
            site: gc.site.clone(),
            attck_hint: gc.attck_hint.clone(),
            entities: gc.entities.clone(),
            top_features: gc.top_features.clone(),
            ts: gc.ts,
        }
    }
}

fn severity_for_high(posterior: f64) -> Severity {
    if posterior > 0.9 {
        Severity::Critical
    } else {
        Severity::High
    }
}

fn severity_for_medium(posterior: f64) -> Severity {
    if posterior > 0.7 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn gc_result(posterior: f64, uncertainty: f64) -> GcResult {
        GcResult {
            window_key: "tenant-a:0".to_string(),
            tenant: "tenant-a".to_string(),
            site: None,
            posterior,
            uncertainty,
            confidence: 1.0 - uncertainty,
            agent_count: 1,
            agents: BTreeSet::from(["mqtt".to_string()]),
            top_features: vec![],
            attck_hint: vec![],
            entities: vec![],
            belief: posterior,
            plausibility: posterior,
            high_conflict: false,
            ts: Utc::now(),
        }
    }

    #[test]
    fn happy_path_scenario_1() {
        let pr = PolicyResponse::new(PolicyConfig::default());
        let alert = pr.evaluate(&gc_result(0.9, 0.1));
        assert_eq!(alert.action, Action::Alert);
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn posterior_above_point_nine_is_critical_without_two_step() {
        let mut cfg = PolicyConfig::default();
        cfg.two_step_validation = false;
        let pr = PolicyResponse::new(cfg);
        let alert = pr.evaluate(&gc_result(0.95, 0.1));
        assert_eq!(alert.action, Action::Isolate);
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn boundary_posterior_equals_alert_threshold_is_alert() {
        let pr = PolicyResponse::new(PolicyConfig::default());
        let alert = pr.evaluate(&gc_result(0.6, 0.1));
        assert_eq!(alert.action, Action::Alert);
    }

    #[test]
    fn boundary_posterior_zero_is_monitor() {
        let pr = PolicyResponse::new(PolicyConfig::default());
        let alert = pr.evaluate(&gc_result(0.0, 0.1));
        assert_eq!(alert.action, Action::Monitor);
        assert_eq!(alert.severity, Severity::Low);
    }

    #[test]
    fn high_uncertainty_downgrades_severity_to_medium() {
        let pr = PolicyResponse::new(PolicyConfig::default());
        let alert = pr.evaluate(&gc_result(0.7, 0.6));
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn alert_ids_are_monotonically_increasing() {
        let pr = PolicyResponse::new(PolicyConfig::default());
        let a = pr.evaluate(&gc_result(0.9, 0.1));
        let b = pr.evaluate(&gc_result(0.9, 0.1));
        assert_ne!(a.alert_id, b.alert_id);
    }
}
