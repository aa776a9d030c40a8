//! parley-engine — the UAP session protocol engine.
//!
//! Everything between the socket and the wire format lives here: the
//! concurrent session registry with its expiry index, the per-session
//! state machine, the expiry sweeper, and the per-datagram dispatcher.
//! `parleyd` only wires these together; integration tests drive a full
//! in-process server through this crate.

pub mod dispatch;
pub mod machine;
pub mod outbound;
pub mod registry;
pub mod sweeper;

pub use dispatch::PacketDispatcher;
pub use machine::ProtocolMachine;
pub use outbound::ReturnPath;
pub use registry::{Session, SessionRegistry, SessionState, SharedRegistry};
pub use sweeper::ExpirySweeper;
