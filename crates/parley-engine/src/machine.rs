//! Per-session protocol state machine.
//!
//! `decide` is the pure transition table: given the session's phase, its
//! last accepted sequence number, and the inbound command, it names the
//! registry mutation and reply to perform. `ProtocolMachine` applies a
//! verdict — refreshes or removes the session and sends the reply — with
//! the registry lock already released.

use std::ops::Range;
use std::sync::Arc;

use parley_core::clock::ProtocolClock;
use parley_core::wire::{Command, Packet};

use crate::outbound::ReturnPath;
use crate::registry::{Session, SessionState, SharedRegistry};

/// Why a session is being closed. Shapes the log line only; the client
/// always just sees a GOODBYE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Command not legal in the current state.
    ProtocolViolation,
    /// DATA sequence number went backwards. Fatal, not recoverable.
    SequenceRegression,
    /// Client sent GOODBYE. A clean close, not an error.
    ClientClose,
}

/// Outcome of one inbound packet against one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Refresh the session (state, sequence, deadline, return path) and
    /// reply. `lost` holds the sequence numbers skipped over by this
    /// packet — advisory, reported but never retransmitted.
    Accept {
        next_state: SessionState,
        reply: Command,
        lost: Range<u32>,
    },
    /// Duplicate DATA: acknowledge with ALIVE, mutate nothing.
    Duplicate,
    /// Terminate the session with a GOODBYE.
    Close(CloseReason),
    /// Session already in `Done`; log and do nothing.
    Ignore,
}

/// The transition table. Pure; sequence comparisons are plain unsigned
/// `u32` with no wraparound handling, matching the reference behavior.
pub fn decide(state: SessionState, last_seq: u32, command: Command, sequence: u32) -> Verdict {
    match (state, command) {
        (SessionState::Start, Command::Hello) => Verdict::Accept {
            next_state: SessionState::Receive,
            reply: Command::Hello,
            lost: sequence..sequence,
        },
        (SessionState::Start, _) => Verdict::Close(CloseReason::ProtocolViolation),

        (SessionState::Receive, Command::Data) => {
            if sequence < last_seq {
                Verdict::Close(CloseReason::SequenceRegression)
            } else if sequence == last_seq {
                Verdict::Duplicate
            } else {
                Verdict::Accept {
                    next_state: SessionState::Receive,
                    reply: Command::Alive,
                    lost: last_seq + 1..sequence,
                }
            }
        }
        (SessionState::Receive, Command::Goodbye) => Verdict::Close(CloseReason::ClientClose),
        (SessionState::Receive, _) => Verdict::Close(CloseReason::ProtocolViolation),

        (SessionState::Done, _) => Verdict::Ignore,
    }
}

/// Applies verdicts against the registry and the wire.
pub struct ProtocolMachine {
    registry: SharedRegistry,
    clock: Arc<ProtocolClock>,
}

impl ProtocolMachine {
    pub fn new(registry: SharedRegistry, clock: Arc<ProtocolClock>) -> Self {
        Self { registry, clock }
    }

    /// Handle one accepted inbound packet. `session` is the snapshot taken
    /// at lookup time; `path` is where this datagram actually came from.
    pub async fn handle(&self, session: &Session, packet: &Packet, path: ReturnPath) {
        let id = packet.session_id;

        match decide(session.state, session.last_seq, packet.command, packet.sequence) {
            Verdict::Accept {
                next_state,
                reply,
                lost,
            } => {
                for missing in lost {
                    tracing::warn!(session_id = id, sequence = missing, "lost packet");
                }
                if packet.command == Command::Data {
                    log_data(id, packet);
                }

                // A terminate may have raced ahead; if the session is gone,
                // do not speak for it.
                if !self
                    .registry
                    .refresh(id, next_state, packet.sequence, path.clone())
                {
                    tracing::debug!(session_id = id, "refresh lost race with terminate");
                    return;
                }
                path.send_command(&self.clock, reply, id).await;
            }

            Verdict::Duplicate => {
                tracing::info!(session_id = id, sequence = packet.sequence, "duplicate packet");
                // No refresh: the reply goes to the return path recorded by
                // the last accepted packet, and the deadline stays put.
                session.path.send_command(&self.clock, Command::Alive, id).await;
            }

            Verdict::Close(reason) => {
                match reason {
                    CloseReason::ProtocolViolation => tracing::warn!(
                        session_id = id,
                        state = ?session.state,
                        command = ?packet.command,
                        "unexpected command, terminating session"
                    ),
                    CloseReason::SequenceRegression => tracing::warn!(
                        session_id = id,
                        sequence = packet.sequence,
                        last_seq = session.last_seq,
                        "sequence number regressed, terminating session"
                    ),
                    CloseReason::ClientClose => {
                        tracing::info!(session_id = id, "received goodbye from client")
                    }
                }
                self.terminate(id).await;
            }

            Verdict::Ignore => {
                tracing::info!(session_id = id, "session already complete");
            }
        }
    }

    /// Remove the session and send its GOODBYE. Idempotent: a second
    /// terminate (or one aimed at an id that never existed) finds nothing
    /// in the registry and is a silent no-op, so any dispatcher/sweeper
    /// race still yields exactly one GOODBYE.
    pub async fn terminate(&self, id: u32) {
        if let Some(session) = self.registry.remove(id) {
            session
                .path
                .send_command(&self.clock, Command::Goodbye, id)
                .await;
            tracing::info!(session_id = id, "session closed");
        }
    }
}

/// Log a DATA payload the way the reference server printed it: session and
/// sequence, plus the printable characters of the payload.
fn log_data(id: u32, packet: &Packet) {
    if packet.payload.is_empty() {
        tracing::info!(session_id = id, sequence = packet.sequence, "no data in packet");
        return;
    }
    let preview: String = packet
        .payload
        .iter()
        .map(|&b| b as char)
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    tracing::info!(
        session_id = id,
        sequence = packet.sequence,
        data = %preview,
        "data received"
    );
}
