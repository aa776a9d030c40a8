//! Parley integration test harness.
//!
//! Each test starts a full in-process server (dispatcher + sweeper) on a
//! loopback socket with an OS-assigned port, then speaks the protocol to
//! it from scripted UDP clients. Tests own their server and stop it when
//! done; nothing is shared between tests.

mod support;

mod handshake;
mod sequencing;
