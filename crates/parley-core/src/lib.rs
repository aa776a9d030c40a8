//! parley-core — wire format, logical clock, and configuration.
//! All other Parley crates depend on this one.

pub mod clock;
pub mod config;
pub mod wire;

pub use clock::{now_micros, ProtocolClock, Stamp};
pub use wire::{Command, Packet, WireError};
