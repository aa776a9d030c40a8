//! Per-datagram dispatcher — the server's receive loop.
//!
//! Each inbound datagram is copied into an owned buffer and handed to its
//! own spawned worker, so a slow send for one session never stalls the
//! socket. The registry serializes workers touching the same session id;
//! nothing else is shared except the lock-free clock.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use parley_core::clock::{now_micros, ProtocolClock};
use parley_core::wire::{self, HEADER_SIZE, MAX_PAYLOAD};

use crate::machine::ProtocolMachine;
use crate::outbound::ReturnPath;
use crate::registry::SharedRegistry;

pub struct PacketDispatcher {
    socket: Arc<UdpSocket>,
    registry: SharedRegistry,
    clock: Arc<ProtocolClock>,
    shutdown: broadcast::Receiver<()>,
}

impl PacketDispatcher {
    pub fn new(
        socket: Arc<UdpSocket>,
        registry: SharedRegistry,
        clock: Arc<ProtocolClock>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            registry,
            clock,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let machine = Arc::new(ProtocolMachine::new(
            self.registry.clone(),
            self.clock.clone(),
        ));

        let mut buf = vec![0u8; HEADER_SIZE + MAX_PAYLOAD];
        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("dispatcher shutting down");
                    break;
                }

                // Reap finished workers so the set does not grow unbounded.
                Some(_) = workers.join_next(), if !workers.is_empty() => {}

                result = self.socket.recv_from(&mut buf) => {
                    let (len, peer_addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    // The worker owns its copy; `buf` is immediately reusable.
                    let datagram = buf[..len].to_vec();
                    let path = ReturnPath::new(self.socket.clone(), peer_addr);
                    let registry = self.registry.clone();
                    let clock = self.clock.clone();
                    let machine = machine.clone();

                    workers.spawn(async move {
                        process_datagram(datagram, path, registry, clock, machine).await;
                    });
                }
            }
        }

        // Stop accepting first, then let in-flight workers finish before
        // shutdown proceeds to the final report.
        while workers.join_next().await.is_some() {}
        Ok(())
    }
}

/// Handle one datagram end to end. Worker body; also the test entry point.
pub async fn process_datagram(
    datagram: Vec<u8>,
    path: ReturnPath,
    registry: SharedRegistry,
    clock: Arc<ProtocolClock>,
    machine: Arc<ProtocolMachine>,
) {
    let packet = match wire::decode(&datagram) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(error = %e, peer = %path.addr(), "invalid packet header");
            // Terminate whichever session the broken header named, if any.
            if let Some(id) = e.session_id() {
                machine.terminate(id).await;
            }
            return;
        }
    };

    let (session, created) = registry.find_or_create(packet.session_id, path.clone());

    // A pre-existing session past its deadline means the sweeper is about
    // to reap it (or a datagram arrived very late). Reject rather than
    // resurrect.
    if !created && session.deadline < now_micros() {
        tracing::warn!(
            session_id = packet.session_id,
            deadline = session.deadline,
            "datagram for expired session"
        );
        machine.terminate(packet.session_id).await;
        return;
    }

    // Lamport receive rule and latency sample, exactly once per accepted
    // packet, before any reply is stamped.
    clock.observe(packet.logical_clock);
    clock.record_latency(now_micros() as i64 - packet.timestamp as i64);

    machine.handle(&session, &packet, path).await;
}
