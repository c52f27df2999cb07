//! Protocol agents: the collect→detect loop each worker runs (§4.4). The
//! real packet-parsing agents (MQTT/HTTP/CoAP/Modbus/QUIC/Zigbee) are
//! external collaborators per §1 — out of scope here. This module fixes
//! only the `ProtocolAgent` contract they must satisfy and ships a
//! deterministic simulated agent so the supervisor's pipeline is
//! exercisable end-to-end without a live network tap.

use comidf_uer::{RawDetector, RawFeatures};
use rand::Rng;

/// The contract a protocol-specific feature extractor satisfies. `collect`
/// performs the (out-of-scope) capture/detection work and returns the
/// normalizer's two inputs.
pub trait ProtocolAgent: Send {
    fn tag(&self) -> &str;
    fn collect(&mut self) -> (RawFeatures, RawDetector);
}

/// A synthetic agent standing in for a real protocol parser: emits
/// plausible feature/score pairs so the edge pipeline (normalize → buffer
/// → connector) has something to carry end-to-end in this repo's own
/// tests and local runs.
pub struct SimulatedAgent {
    tag: String,
    base_score: f64,
}

impl SimulatedAgent {
    pub fn new(tag: impl Into<String>, base_score: f64) -> Self {
        Self {
            tag: tag.into(),
            base_score: base_score.clamp(0.0, 1.0),
        }
    }
}

impl ProtocolAgent for SimulatedAgent {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn collect(&mut self) -> (RawFeatures, RawDetector) {
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-0.1..0.1);
        let score = (self.base_score + jitter).clamp(0.0, 1.0);
        let conf = rng.gen_range(0.6..1.0_f64).min(1.0);

        let mut stats = std::collections::BTreeMap::new();
        stats.insert("len_mean".to_string(), rng.gen_range(40.0..1500.0));
        stats.insert("iat_mean".to_string(), rng.gen_range(1.0..200.0));

        let raw = RawFeatures {
            src_ip: Some(format!("10.0.{}.{}", rng.gen_range(0..255), rng.gen_range(1..255))),
            dst_ip: Some("10.0.0.1".to_string()),
            stats,
            ..Default::default()
        };
        let det = RawDetector {
            score,
            conf,
            model: Some(format!("{}-v1", self.tag.to_lowercase())),
            entities: vec!["device_id".to_string()],
            attck_hint: vec![],
        };
        (raw, det)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_agent_emits_in_range_scores() {
        let mut agent = SimulatedAgent::new("mqtt", 0.5);
        for _ in 0..50 {
            let (_, det) = agent.collect();
            assert!((0.0..=1.0).contains(&det.score));
            assert!((0.0..=1.0).contains(&det.conf));
        }
    }
}
