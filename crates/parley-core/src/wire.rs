//! Parley wire format — the on-wire header for all UAP messages.
//!
//! Every datagram, client-to-server or server-to-client, starts with the
//! 28-byte header below. All multi-byte fields are network byte order,
//! which the zerocopy byteorder types enforce at the type level — there is
//! no manual byte shuffling and no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Protocol magic. A datagram that does not open with this is not ours.
pub const MAGIC: u16 = 0xC461;

/// Current protocol version.
pub const VERSION: u8 = 1;

/// Wire size of the message header.
pub const HEADER_SIZE: usize = 28;

/// Maximum payload size in bytes. Only DATA messages carry a payload.
pub const MAX_PAYLOAD: usize = 4096;

// ── Commands ──────────────────────────────────────────────────────────────────

/// Protocol command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Session open. Client sends it once; the server echoes it back.
    Hello = 0,
    /// Payload-carrying message, acknowledged with ALIVE.
    Data = 1,
    /// Server liveness acknowledgement.
    Alive = 2,
    /// Session close, from either side. Always the last message of a session.
    Goodbye = 3,
}

impl Command {
    /// Parse a command byte. `None` for anything outside 0..=3.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Command::Hello),
            1 => Some(Command::Data),
            2 => Some(Command::Alive),
            3 => Some(Command::Goodbye),
            _ => None,
        }
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// The fixed message header.
///
/// `U16`/`U32`/`U64<NetworkEndian>` store big-endian bytes and have alignment
/// one, so the struct layout matches the wire byte-for-byte.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Header {
    pub magic: U16<NetworkEndian>,
    pub version: u8,
    pub command: u8,
    pub sequence: U32<NetworkEndian>,
    pub session_id: U32<NetworkEndian>,
    pub logical_clock: U64<NetworkEndian>,
    pub timestamp: U64<NetworkEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(Header, [u8; HEADER_SIZE]);

// ── Decoded packet ────────────────────────────────────────────────────────────

/// A validated inbound message with all fields in native byte order.
#[derive(Debug, Clone)]
pub struct Packet {
    pub command: Command,
    pub sequence: u32,
    pub session_id: u32,
    pub logical_clock: u64,
    /// Sender wall-clock in microseconds since the epoch.
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

/// Decode and validate one datagram.
///
/// Magic, version, and command are checked here; everything past the header
/// is opaque payload. Errors carry the session id when the header was at
/// least readable, so the caller can terminate the referenced session.
pub fn decode(datagram: &[u8]) -> Result<Packet, WireError> {
    let header =
        Header::read_from_prefix(datagram).ok_or(WireError::Truncated(datagram.len()))?;

    let magic = header.magic.get();
    let session_id = header.session_id.get();

    if magic != MAGIC {
        return Err(WireError::BadMagic { magic, session_id });
    }
    if header.version != VERSION {
        return Err(WireError::BadVersion {
            version: header.version,
            session_id,
        });
    }
    let command = Command::from_byte(header.command).ok_or(WireError::UnknownCommand {
        command: header.command,
        session_id,
    })?;

    Ok(Packet {
        command,
        sequence: header.sequence.get(),
        session_id,
        logical_clock: header.logical_clock.get(),
        timestamp: header.timestamp.get(),
        payload: datagram[HEADER_SIZE..].to_vec(),
    })
}

/// Encode one outbound message: header plus optional payload.
pub fn encode(
    command: Command,
    sequence: u32,
    session_id: u32,
    logical_clock: u64,
    timestamp: u64,
    payload: &[u8],
) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);

    let header = Header {
        magic: U16::new(MAGIC),
        version: VERSION,
        command: command.into(),
        sequence: U32::new(sequence),
        session_id: U32::new(session_id),
        logical_clock: U64::new(logical_clock),
        timestamp: U64::new(timestamp),
    };

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Framing errors. Any of these invalidates the whole datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram too short: {0} bytes, header needs {HEADER_SIZE}")]
    Truncated(usize),

    #[error("bad magic 0x{magic:04x} (session {session_id})")]
    BadMagic { magic: u16, session_id: u32 },

    #[error("unsupported version {version} (session {session_id})")]
    BadVersion { version: u8, session_id: u32 },

    #[error("unknown command byte 0x{command:02x} (session {session_id})")]
    UnknownCommand { command: u8, session_id: u32 },
}

impl WireError {
    /// The session id named by the offending header, when one could be read.
    pub fn session_id(&self) -> Option<u32> {
        match *self {
            WireError::Truncated(_) => None,
            WireError::BadMagic { session_id, .. }
            | WireError::BadVersion { session_id, .. }
            | WireError::UnknownCommand { session_id, .. } => Some(session_id),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
