//! Feedback Handler (C9): receive/persist/apply AFL policies on the edge.
//! Grounded on `original_source/edge-agent/core/feedback.py`. Idempotent;
//! newest `ts` wins per agent tag; persisted atomically
//! (write-temp-then-rename) before acknowledging.

use comidf_uer::Policy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("failed to persist policy file: {0}")]
    Persist(#[from] std::io::Error),
    #[error("policy missing 'agent' tag")]
    MissingAgent,
}

pub struct FeedbackHandler {
    path: PathBuf,
    default_threshold: f64,
    // RwLock: readers (all protocol agents on each event) never block each
    // other; only the feedback handler itself writes (§5).
    policies: RwLock<BTreeMap<String, Policy>>,
}

impl FeedbackHandler {
    pub fn new(path: impl Into<PathBuf>, default_threshold: f64) -> Self {
        Self {
            path: path.into(),
            default_threshold,
            policies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Loads previously persisted policies from disk at startup.
    pub fn load(&self) -> Result<(), FeedbackError> {
        if !self.path.exists() {
            info!("no existing policy file, starting empty");
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<BTreeMap<String, Policy>>(&raw) {
            Ok(loaded) => {
                info!(count = loaded.len(), "loaded_policies");
                *self.policies.write() = loaded;
            }
            Err(e) => error!(error = %e, "failed_to_parse_policy_file"),
        }
        Ok(())
    }

    /// Applies a policy. Idempotent: if an existing policy for the same
    /// agent tag has a newer-or-equal `ts`, the incoming one is ignored.
    pub fn apply_policy(&self, policy: Policy) -> Result<(), FeedbackError> {
        if policy.agent.is_empty() {
            return Err(FeedbackError::MissingAgent);
        }
        {
            let mut guard = self.policies.write();
            let should_replace = guard
                .get(&policy.agent)
                .map(|existing| policy.ts > existing.ts)
                .unwrap_or(true);
            if !should_replace {
                warn!(agent = %policy.agent, "stale_policy_ignored");
                return Ok(());
            }
            guard.insert(policy.agent.clone(), policy.clone());
        }
        self.persist()?;
        info!(agent = %policy.agent, threshold = policy.thresholds.score_alert, "policy_applied");
        Ok(())
    }

    pub fn get_policy(&self, agent: &str) -> Option<Policy> {
        self.policies.read().get(agent).cloned()
    }

    /// Returns the last-applied policy's alert threshold, falling back to
    /// the configured default when no policy has been applied yet.
    pub fn get_threshold(&self, agent: &str) -> f64 {
        self.policies
            .read()
            .get(agent)
            .map(|p| p.thresholds.score_alert)
            .unwrap_or(self.default_threshold)
    }

    fn persist(&self) -> Result<(), FeedbackError> {
        let guard = self.policies.read();
        let json = serde_json::to_string_pretty(&*guard).unwrap_or_default();
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comidf_uer::{Sampling, Thresholds, Trust};
    use chrono::{Duration as ChronoDuration, Utc};

    fn policy(agent: &str, threshold: f64, ts_offset_secs: i64) -> Policy {
        Policy {
            agent: agent.to_string(),
            thresholds: Thresholds {
                score_alert: threshold,
                recalibrated_hint: None,
            },
            sampling: Sampling { rate: 1.0 },
            trust: Trust { w: 0.7, decay: 0.9 },
            ts: Utc::now() + ChronoDuration::seconds(ts_offset_secs),
            schema: comidf_uer::AFL_SCHEMA_VERSION.to_string(),
        }
    }

    #[test]
    fn newest_ts_wins_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FeedbackHandler::new(dir.path().join("policies.json"), 0.7);

        handler.apply_policy(policy("mqtt", 0.65, 0)).unwrap();
        handler.apply_policy(policy("mqtt", 0.80, -10)).unwrap(); // older, ignored
        assert_eq!(handler.get_threshold("mqtt"), 0.65);

        handler.apply_policy(policy("mqtt", 0.72, 10)).unwrap(); // newer, applied
        assert_eq!(handler.get_threshold("mqtt"), 0.72);
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FeedbackHandler::new(dir.path().join("policies.json"), 0.7);
        assert_eq!(handler.get_threshold("unknown-proto"), 0.7);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");

        {
            let handler = FeedbackHandler::new(&path, 0.7);
            handler.apply_policy(policy("mqtt", 0.65, 0)).unwrap();
        }

        let handler = FeedbackHandler::new(&path, 0.7);
        handler.load().unwrap();
        assert_eq!(handler.get_threshold("mqtt"), 0.65);
    }

    #[test]
    fn afl_policy_round_trip_scenario_6() {
        // §8 scenario 6: precision=0.8, recall=0.7, load=0.5 -> threshold 0.65
        let dir = tempfile::tempdir().unwrap();
        let handler = FeedbackHandler::new(dir.path().join("policies.json"), 0.7);
        handler.apply_policy(policy("mqtt", 0.65, 0)).unwrap();
        assert_eq!(handler.get_threshold("mqtt"), 0.65);
    }
}
