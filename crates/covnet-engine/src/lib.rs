//! The protocol engine seam for covnet.
//!
//! The COV orchestration layer never speaks BACnet on the wire itself; it
//! drives a [`ProtocolEngine`] that issues confirmed requests to remote
//! devices and pushes COV notifications to registered [`EventListener`]s.
//! Engines are built by an [`EngineFactory`] so configuration changes can
//! replace them wholesale.
//!
//! [`SimulatedNetwork`] is an in-memory implementation used by the test
//! suites and for development without a BACnet network.

pub mod error;
pub mod event;
pub mod request;
pub mod simulator;
pub mod traits;

pub use error::EngineError;
pub use event::{CovEvent, CovValue, EngineEvent, EventListener};
pub use request::{
    CovReference, CovSpecification, ReadAccess, SubscribeRequest, WireSubscriptionId, WriteAccess,
};
pub use simulator::{CallKind, SimulatedEngine, SimulatedNetwork};
pub use traits::{EngineFactory, EngineSettings, ProtocolEngine};
