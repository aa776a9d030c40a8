//! parleyd — UAP session protocol daemon.
//!
//! Binds one UDP socket and runs the engine: a dispatcher spawning one
//! worker per datagram, an expiry sweeper, and two shutdown triggers
//! (ctrl-c and a `q` line on stdin). Shutdown stops the receive loop,
//! drains every remaining session with a GOODBYE, waits for in-flight
//! workers, and prints the average one-way latency.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use parley_core::clock::ProtocolClock;
use parley_core::config::ParleyConfig;
use parley_engine::{ExpirySweeper, PacketDispatcher, SessionRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ParleyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParleyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    });

    // A port on the command line overrides the config.
    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .context("invalid port number, expected a positive integer like 8080")?,
        None => config.network.port,
    };

    let socket = Arc::new(
        UdpSocket::bind(("0.0.0.0", port))
            .await
            .context("failed to bind server socket")?,
    );
    tracing::info!(port, timeout_secs = config.session.timeout_secs, "server listening");

    // Shared state
    let clock = Arc::new(ProtocolClock::new());
    let registry = SessionRegistry::shared(config.session.timeout());

    // ── Shutdown triggers ────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    {
        let shutdown = shutdown_tx.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim() == "q" {
                    tracing::info!("quit command received");
                    // The operator command is a local event in Lamport terms.
                    clock.tick();
                    let _ = shutdown.send(());
                    break;
                }
            }
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let dispatcher_task = tokio::spawn(
        PacketDispatcher::new(
            socket,
            registry.clone(),
            clock.clone(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let sweeper_task = tokio::spawn(
        ExpirySweeper::new(
            registry,
            clock.clone(),
            config.session.timeout(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    // ── Wait for exit ────────────────────────────────────────────────────────

    if let Err(e) = dispatcher_task.await? {
        tracing::error!(error = %e, "dispatcher failed");
    }
    if let Err(e) = sweeper_task.await? {
        tracing::error!(error = %e, "sweeper failed");
    }

    match clock.average_latency() {
        Some(avg) => println!("Average one-way latency: {avg:.0} micro-seconds"),
        None => println!("no messages received"),
    }
    tracing::info!("server shut down");

    Ok(())
}
