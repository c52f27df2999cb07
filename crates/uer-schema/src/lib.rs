//! Unified Event Record (UER) schema, policy wire format, and the edge
//! normalizer that turns protocol-agent output into a `Uer`.
//!
//! Shared between `edge-agent` (produces UERs, consumes `Policy`) and
//! `cloud-platform` (consumes UERs, produces `Policy`).

mod normalize;
mod types;

pub use normalize::{NormalizeError, Normalizer, RawDetector, RawFeatures};
pub use types::{
    Detector, Endpoint, Policy, ProtoInfo, Sampling, Thresholds, Trust, Uer, UnitInterval,
    AFL_SCHEMA_VERSION, UER_SCHEMA_VERSION,
};
