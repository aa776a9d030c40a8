//! Shared harness: an in-process server and a scripted client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use parley_core::clock::{now_micros, ProtocolClock};
use parley_core::wire::{self, Command, Packet, HEADER_SIZE, MAX_PAYLOAD};
use parley_engine::{ExpirySweeper, PacketDispatcher, SessionRegistry, SharedRegistry};

/// How long a client waits for a reply before giving up.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: SharedRegistry,
    pub clock: Arc<ProtocolClock>,
    pub shutdown: broadcast::Sender<()>,
    dispatcher: JoinHandle<Result<()>>,
    sweeper: JoinHandle<Result<()>>,
}

/// Start a full server on a loopback socket. `timeout` is both the session
/// timeout and the sweeper interval, exactly as in the daemon.
pub async fn start_server(timeout: Duration) -> Result<TestServer> {
    let socket = Arc::new(
        UdpSocket::bind("127.0.0.1:0")
            .await
            .context("failed to bind test server socket")?,
    );
    let addr = socket.local_addr()?;

    let clock = Arc::new(ProtocolClock::new());
    let registry = SessionRegistry::shared(timeout);
    let (shutdown, _) = broadcast::channel(1);

    let dispatcher = tokio::spawn(
        PacketDispatcher::new(
            socket,
            registry.clone(),
            clock.clone(),
            shutdown.subscribe(),
        )
        .run(),
    );
    let sweeper = tokio::spawn(
        ExpirySweeper::new(registry.clone(), clock.clone(), timeout, shutdown.subscribe()).run(),
    );

    Ok(TestServer {
        addr,
        registry,
        clock,
        shutdown,
        dispatcher,
        sweeper,
    })
}

impl TestServer {
    /// Trigger shutdown and wait for both tasks to finish.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.dispatcher.await??;
        self.sweeper.await??;
        Ok(())
    }
}

pub struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
    pub session_id: u32,
}

impl TestClient {
    pub async fn connect(server: SocketAddr, session_id: u32) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .context("failed to bind test client socket")?;
        Ok(Self {
            socket,
            server,
            session_id,
        })
    }

    /// Send one protocol message with the client's own clock and timestamp.
    pub async fn send(&self, command: Command, sequence: u32, payload: &[u8]) -> Result<()> {
        let bytes = wire::encode(
            command,
            sequence,
            self.session_id,
            0,
            now_micros(),
            payload,
        );
        self.send_raw(&bytes).await
    }

    /// Send raw bytes, for malformed-datagram tests.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        self.socket.send_to(bytes, self.server).await?;
        Ok(())
    }

    /// Receive and decode the next reply.
    pub async fn recv(&self) -> Result<Packet> {
        let mut buf = [0u8; HEADER_SIZE + MAX_PAYLOAD];
        let (len, _) = tokio::time::timeout(REPLY_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .context("timed out waiting for a reply")??;
        Ok(wire::decode(&buf[..len])?)
    }

    /// Receive the next reply and assert its command.
    pub async fn expect(&self, command: Command) -> Result<Packet> {
        let packet = self.recv().await?;
        anyhow::ensure!(
            packet.command == command,
            "expected {command:?}, got {:?}",
            packet.command
        );
        anyhow::ensure!(
            packet.session_id == self.session_id,
            "reply for wrong session: {}",
            packet.session_id
        );
        Ok(packet)
    }

    /// Assert that no reply arrives within `wait`.
    pub async fn expect_silence(&self, wait: Duration) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE + MAX_PAYLOAD];
        let result = tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await;
        anyhow::ensure!(result.is_err(), "expected no reply, but one arrived");
        Ok(())
    }
}
