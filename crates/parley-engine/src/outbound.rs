//! Outbound send path — where replies for a session go.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use parley_core::clock::ProtocolClock;
use parley_core::wire::{self, Command};

/// Socket handle plus the sender address recorded from a client datagram.
///
/// Stored per session and replaced on every refresh — the address may
/// legitimately change across packets (NAT rebinding), so replies always
/// chase the most recent one.
#[derive(Debug, Clone)]
pub struct ReturnPath {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
}

impl ReturnPath {
    pub fn new(socket: Arc<UdpSocket>, addr: SocketAddr) -> Self {
        Self { socket, addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stamp and send one header-only command, then advance the clock for
    /// the send event. A transport failure is logged and abandoned; it never
    /// propagates to the caller's session handling.
    pub async fn send_command(&self, clock: &ProtocolClock, command: Command, session_id: u32) {
        let stamp = clock.stamp();
        let bytes = wire::encode(
            command,
            stamp.sequence,
            session_id,
            stamp.logical_clock,
            stamp.timestamp,
            &[],
        );

        if let Err(e) = self.socket.send_to(&bytes, self.addr).await {
            tracing::warn!(error = %e, session_id, ?command, "send failed");
        }

        clock.tick();
    }
}
