use crate::types::{Detector, Endpoint, ProtoInfo, Uer, UnitInterval};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Raw protocol-agent output, pre-normalization. Grounded on
/// `original_source/edge-agent/core/fal.py`'s loosely-typed `raw: dict`,
/// re-architected as a tagged record per the Design Notes (§9).
#[derive(Clone, Debug, Default)]
pub struct RawFeatures {
    pub src_ip: Option<String>,
    pub src_port: Option<u16>,
    pub src_device_id: Option<String>,
    pub dst_ip: Option<String>,
    pub dst_port: Option<u16>,
    pub dst_device_id: Option<String>,
    /// RFC3339 string if the protocol agent captured a timestamp; `None`
    /// means "use wall-clock now" per §4.1.
    pub ts: Option<String>,
    pub stats: BTreeMap<String, f64>,
}

#[derive(Clone, Debug)]
pub struct RawDetector {
    pub score: f64,
    pub conf: f64,
    pub model: Option<String>,
    pub entities: Vec<String>,
    pub attck_hint: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("detector.score {0} is not a finite value in [0,1]")]
    InvalidScore(f64),
    #[error("detector.conf {0} is not a finite value in [0,1]")]
    InvalidConf(f64),
    #[error("raw ts {0:?} is not RFC3339")]
    InvalidTimestamp(String),
}

/// Builds UERs from `(protocol_tag, raw_features, detector_output)`, per
/// §4.1. Anonymizes device ids with a per-tenant salt and derives the
/// idempotency-key `uid`.
pub struct Normalizer {
    salt: String,
}

impl Normalizer {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    fn anonymize(&self, raw_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_id.as_bytes());
        hasher.update(self.salt.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_uid(ts: &chrono::DateTime<chrono::Utc>, src_ip: &str, dst_ip: &str, model: &str) -> String {
        let nonce = uuid::Uuid::new_v4();
        let content = format!("{}{}{}{}{}", ts.to_rfc3339(), src_ip, dst_ip, model, nonce);
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Produces a `Uer`. Fails only when the detector output is unusable
    /// (§4.1: "Fails with NormalizeError only when detector.score/conf are
    /// non-numeric or outside [0,1]"); absent src/dst/ts never raises.
    #[allow(clippy::too_many_arguments)]
    pub fn normalize(
        &self,
        protocol_tag: &str,
        raw: &RawFeatures,
        det: &RawDetector,
        tenant: Option<String>,
        site: Option<String>,
    ) -> Result<Uer, NormalizeError> {
        let score = UnitInterval::new(det.score).map_err(|_| NormalizeError::InvalidScore(det.score))?;
        let conf = UnitInterval::new(det.conf).map_err(|_| NormalizeError::InvalidConf(det.conf))?;

        let ts = match &raw.ts {
            Some(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|_| NormalizeError::InvalidTimestamp(s.clone()))?,
            None => chrono::Utc::now(),
        };

        let src_ip = raw.src_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string());
        let dst_ip = raw.dst_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string());

        let src = Endpoint {
            ip: src_ip.clone(),
            port: raw.src_port,
            device_id: raw.src_device_id.as_deref().map(|id| self.anonymize(id)),
        };
        let dst = Endpoint {
            ip: dst_ip.clone(),
            port: raw.dst_port,
            device_id: raw.dst_device_id.as_deref().map(|id| self.anonymize(id)),
        };

        let model = det
            .model
            .clone()
            .unwrap_or_else(|| format!("{}-v1", protocol_tag.to_lowercase()));
        let uid = Self::generate_uid(&ts, &src_ip, &dst_ip, &model);

        Ok(Uer {
            uid,
            ts,
            src,
            dst,
            proto: ProtoInfo {
                l7: protocol_tag.to_uppercase(),
            },
            stats: raw.stats.clone(),
            detector: Detector {
                score,
                conf,
                model,
            },
            entities: det.entities.clone(),
            attck_hint: det.attck_hint.clone(),
            tenant,
            site,
            agent_id: None,
            late: None,
            ingress_ts: None,
            extra: serde_json::Map::new(),
        })
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(score: f64, conf: f64) -> RawDetector {
        RawDetector {
            score,
            conf,
            model: Some("mqtt-v1".to_string()),
            entities: vec!["device_id".to_string()],
            attck_hint: vec![],
        }
    }

    #[test]
    fn uid_is_64_lowercase_hex() {
        let n = Normalizer::new("salt");
        let uer = n.normalize("mqtt", &RawFeatures::default(), &det(0.5, 0.5), None, None).unwrap();
        assert_eq!(uer.uid.len(), 64);
        assert!(uer.uid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn distinct_calls_yield_distinct_uids_even_with_identical_metadata() {
        let n = Normalizer::new("salt");
        let raw = RawFeatures {
            ts: Some("2026-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let a = n.normalize("mqtt", &raw, &det(0.5, 0.5), None, None).unwrap();
        let b = n.normalize("mqtt", &raw, &det(0.5, 0.5), None, None).unwrap();
        assert_ne!(a.uid, b.uid);
    }

    #[test]
    fn missing_ips_default_to_unspecified() {
        let n = Normalizer::new("");
        let uer = n.normalize("http", &RawFeatures::default(), &det(0.1, 0.9), None, None).unwrap();
        assert_eq!(uer.src.ip, "0.0.0.0");
        assert_eq!(uer.dst.ip, "0.0.0.0");
    }

    #[test]
    fn proto_is_uppercased() {
        let n = Normalizer::new("");
        let uer = n.normalize("mqtt", &RawFeatures::default(), &det(0.1, 0.9), None, None).unwrap();
        assert_eq!(uer.proto.l7, "MQTT");
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let n = Normalizer::new("");
        let err = n.normalize("mqtt", &RawFeatures::default(), &det(1.5, 0.5), None, None);
        assert!(matches!(err, Err(NormalizeError::InvalidScore(_))));
    }

    #[test]
    fn nan_conf_is_rejected() {
        let n = Normalizer::new("");
        let err = n.normalize("mqtt", &RawFeatures::default(), &det(0.5, f64::NAN), None, None);
        assert!(matches!(err, Err(NormalizeError::InvalidConf(_))));
    }

    #[test]
    fn empty_salt_with_no_device_id_never_raises_and_has_no_device_id() {
        let n = Normalizer::new("");
        let uer = n.normalize("mqtt", &RawFeatures::default(), &det(0.5, 0.5), None, None).unwrap();
        assert!(uer.src.device_id.is_none());
    }

    #[test]
    fn device_id_is_hashed_not_raw() {
        let n = Normalizer::new("pepper");
        let raw = RawFeatures {
            src_device_id: Some("raw-mac-address".to_string()),
            ..Default::default()
        };
        let uer = n.normalize("mqtt", &raw, &det(0.5, 0.5), None, None).unwrap();
        let hashed = uer.src.device_id.unwrap();
        assert_ne!(hashed, "raw-mac-address");
        assert_eq!(hashed.len(), 64);
    }
}
