//! Expiry sweeper — reaps sessions whose deadline has passed.
//!
//! Runs on a fixed interval equal to the session timeout, independent of
//! inbound traffic. On shutdown it performs one full drain of the registry
//! (every remaining session, due or not) before returning.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use parley_core::clock::{now_micros, ProtocolClock};
use parley_core::wire::Command;

use crate::registry::SharedRegistry;

pub struct ExpirySweeper {
    registry: SharedRegistry,
    clock: Arc<ProtocolClock>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ExpirySweeper {
    pub fn new(
        registry: SharedRegistry,
        clock: Arc<ProtocolClock>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            clock,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("sweeper shutting down, draining sessions");
                    self.drain().await;
                    return Ok(());
                }

                _ = ticker.tick() => {
                    self.sweep(now_micros()).await;
                }
            }
        }
    }

    /// One pass: terminate every session due at or before `now`.
    ///
    /// The sessions come back already removed from the registry, so a
    /// dispatcher racing on the same id finds nothing and stays silent —
    /// one GOODBYE per session, total.
    pub async fn sweep(&self, now: u64) {
        for session in self.registry.pop_expired(now) {
            tracing::warn!(session_id = session.id, "session timed out");
            // One advance for the timeout event itself; the send below
            // advances again, mirroring a normal terminate's two events.
            self.clock.tick();
            session
                .path
                .send_command(&self.clock, Command::Goodbye, session.id)
                .await;
        }
    }

    /// Shutdown path: terminate every remaining session, earliest deadline
    /// first, due or not.
    pub async fn drain(&self) {
        for session in self.registry.drain_all() {
            tracing::info!(session_id = session.id, "terminating session at shutdown");
            session
                .path
                .send_command(&self.clock, Command::Goodbye, session.id)
                .await;
        }
    }
}
