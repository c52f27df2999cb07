//! Cloud Platform (CP): the receive/correlate/react half of CoMIDF.
//! Wires Cloud Ingress (C5), Global Correlator (C6), Policy & Response
//! (C7), Active Feedback Loop (C8), and Admin/Registration (C10).

pub mod admin;
pub mod afl;
pub mod config;
pub mod correlator;
pub mod ingress;
pub mod policy_response;

pub use admin::{AdminRegistry, AgentClaims};
pub use afl::{AflEngine, Outcome};
pub use config::CloudConfig;
pub use correlator::{GcResult, GlobalCorrelator};
pub use ingress::{build_router, AppState, IdempotencyCache, InMemoryIdempotencyCache, LoggingPublisher, Publisher};
pub use policy_response::{Action, Alert, PolicyResponse, Severity};
