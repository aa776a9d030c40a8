//! Session establishment: HELLO handling and framing validation.

use std::time::Duration;

use anyhow::Result;
use parley_core::wire::{self, Command};
use parley_engine::SessionState;

use crate::support::{start_server, TestClient};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn hello_creates_a_session_and_is_echoed() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = TestClient::connect(server.addr, 101).await?;

    client.send(Command::Hello, 0, &[]).await?;
    client.expect(Command::Hello).await?;

    let session = server.registry.get(101).expect("session should exist");
    assert_eq!(session.state, SessionState::Receive);
    assert!(server.registry.is_consistent());

    // Follow-up DATA moves traffic through the steady state.
    client.send(Command::Data, 1, b"first").await?;
    client.expect(Command::Alive).await?;
    assert_eq!(server.registry.get(101).unwrap().last_seq, 1);

    server.stop().await
}

#[tokio::test]
async fn data_to_an_unknown_session_is_a_violation() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = TestClient::connect(server.addr, 102).await?;

    // The server creates the session in Start, then terminates it because
    // the first message was not HELLO.
    client.send(Command::Data, 1, b"oops").await?;
    client.expect(Command::Goodbye).await?;
    assert!(server.registry.get(102).is_none());
    assert!(server.registry.is_consistent());

    server.stop().await
}

#[tokio::test]
async fn bad_magic_terminates_the_named_session() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = TestClient::connect(server.addr, 103).await?;

    client.send(Command::Hello, 0, &[]).await?;
    client.expect(Command::Hello).await?;

    let mut bytes = wire::encode(Command::Data, 1, 103, 0, 0, &[]);
    bytes[0] = 0xDE;
    bytes[1] = 0xAD;
    client.send_raw(&bytes).await?;

    client.expect(Command::Goodbye).await?;
    assert!(server.registry.get(103).is_none());

    server.stop().await
}

#[tokio::test]
async fn bad_magic_for_an_unknown_session_is_silent() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = TestClient::connect(server.addr, 104).await?;

    let mut bytes = wire::encode(Command::Hello, 0, 104, 0, 0, &[]);
    bytes[0] = 0;
    client.send_raw(&bytes).await?;

    client.expect_silence(Duration::from_millis(300)).await?;
    assert!(server.registry.is_empty());

    server.stop().await
}

#[tokio::test]
async fn truncated_datagram_is_discarded() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = TestClient::connect(server.addr, 105).await?;

    client.send_raw(&[0xC4, 0x61, 0x01]).await?;
    client.expect_silence(Duration::from_millis(300)).await?;
    assert!(server.registry.is_empty());

    server.stop().await
}
