//! Process-wide protocol clock and latency accounting.
//!
//! One `ProtocolClock` is shared by every packet worker, the sweeper, and
//! the shutdown path. All fields are independent atomics — callers never
//! need a lock, and staleness of one step between the fields is acceptable
//! because each counter is monotonically non-decreasing on its own.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch. The protocol's only time basis:
/// timestamps on the wire and session deadlines both use it.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Values stamped into one outbound header.
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    pub sequence: u32,
    pub logical_clock: u64,
    pub timestamp: u64,
}

/// Lamport clock, outbound sequence counter, and latency accumulators.
#[derive(Debug, Default)]
pub struct ProtocolClock {
    logical: AtomicU64,
    sequence: AtomicU32,
    latency_total_micros: AtomicI64,
    messages_received: AtomicU64,
}

impl ProtocolClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical clock value.
    pub fn value(&self) -> u64 {
        self.logical.load(Ordering::Acquire)
    }

    /// Lamport receive rule: clock becomes `max(current, received) + 1`.
    ///
    /// Called exactly once per accepted inbound packet, before any reply to
    /// that packet is stamped. Returns the new clock value.
    pub fn observe(&self, received: u64) -> u64 {
        let mut current = self.logical.load(Ordering::Acquire);
        loop {
            let next = current.max(received) + 1;
            match self.logical.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Lamport local-event rule: advance by one. Used after every outbound
    /// send, for a sweeper timeout event, and for the operator quit command.
    pub fn tick(&self) -> u64 {
        self.logical.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Produce the header fields for the next outbound message and advance
    /// the global sequence counter. The first message ever sent carries
    /// sequence zero.
    pub fn stamp(&self) -> Stamp {
        Stamp {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            logical_clock: self.value(),
            timestamp: now_micros(),
        }
    }

    /// Fold one observed one-way latency into the running total.
    ///
    /// Signed because the sender's wall clock may run ahead of ours; a
    /// skewed client yields negative samples rather than a huge unsigned
    /// wraparound.
    pub fn record_latency(&self, micros: i64) {
        self.latency_total_micros.fetch_add(micros, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Average one-way latency in microseconds, or `None` when no message
    /// was ever received.
    pub fn average_latency(&self) -> Option<f64> {
        let count = self.messages_received.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let total = self.latency_total_micros.load(Ordering::Relaxed);
        Some(total as f64 / count as f64)
    }
}
