//! Sequence-number handling: duplicates, gaps, and regressions.

use std::time::Duration;

use anyhow::Result;
use parley_core::wire::Command;

use crate::support::{start_server, TestClient, TestServer};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn established(server: &TestServer, session_id: u32) -> Result<TestClient> {
    let client = TestClient::connect(server.addr, session_id).await?;
    client.send(Command::Hello, 0, &[]).await?;
    client.expect(Command::Hello).await?;
    Ok(client)
}

#[tokio::test]
async fn duplicate_data_gets_one_alive_each_and_no_mutation() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = established(&server, 201).await?;

    client.send(Command::Data, 1, b"payload").await?;
    client.expect(Command::Alive).await?;
    let deadline_after_first = server.registry.get(201).unwrap().deadline;

    client.send(Command::Data, 1, b"payload").await?;
    client.expect(Command::Alive).await?;

    let session = server.registry.get(201).unwrap();
    assert_eq!(session.last_seq, 1);
    // The duplicate neither refreshed the deadline nor touched the index.
    assert_eq!(session.deadline, deadline_after_first);
    assert!(server.registry.is_consistent());

    server.stop().await
}

#[tokio::test]
async fn gap_advances_last_seq_to_the_new_high_water_mark() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = established(&server, 202).await?;

    client.send(Command::Data, 1, b"one").await?;
    client.expect(Command::Alive).await?;

    // 2, 3, 4 never arrive; the server reports them lost and moves on.
    client.send(Command::Data, 5, b"five").await?;
    client.expect(Command::Alive).await?;

    assert_eq!(server.registry.get(202).unwrap().last_seq, 5);
    server.stop().await
}

#[tokio::test]
async fn regressed_sequence_terminates_the_session() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = established(&server, 203).await?;

    client.send(Command::Data, 5, b"five").await?;
    client.expect(Command::Alive).await?;

    client.send(Command::Data, 3, b"three").await?;
    client.expect(Command::Goodbye).await?;

    assert!(server.registry.get(203).is_none());
    assert!(server.registry.is_consistent());
    server.stop().await
}

#[tokio::test]
async fn hello_in_receive_state_is_a_violation() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let client = established(&server, 204).await?;

    client.send(Command::Hello, 1, &[]).await?;
    client.expect(Command::Goodbye).await?;
    assert!(server.registry.get(204).is_none());

    server.stop().await
}

#[tokio::test]
async fn sessions_do_not_interfere() -> Result<()> {
    let server = start_server(TIMEOUT).await?;
    let left = established(&server, 205).await?;
    let right = established(&server, 206).await?;

    // Killing one session leaves the other untouched.
    left.send(Command::Data, 5, b"x").await?;
    left.expect(Command::Alive).await?;
    left.send(Command::Data, 1, b"x").await?;
    left.expect(Command::Goodbye).await?;

    right.send(Command::Data, 1, b"y").await?;
    right.expect(Command::Alive).await?;

    assert!(server.registry.get(205).is_none());
    assert_eq!(server.registry.get(206).unwrap().last_seq, 1);
    server.stop().await
}
