//! Edge Agent (EA): the on-premises half of CoMIDF. Wires the Durable
//! Buffer (C2), Secure Connector (C3), Edge Supervisor (C4), and Feedback
//! Handler (C9) around a set of protocol agents (C1 produces the UERs
//! they emit).

pub mod agents;
pub mod buffer;
pub mod config;
pub mod connector;
pub mod feedback;
pub mod supervisor;

pub use agents::{ProtocolAgent, SimulatedAgent};
pub use buffer::{BufferError, DurableBuffer};
pub use config::EdgeConfig;
pub use connector::{SecureConnector, SendOutcome, TransportError};
pub use feedback::{FeedbackError, FeedbackHandler};
pub use supervisor::EdgeSupervisor;
