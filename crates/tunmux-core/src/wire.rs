//! tunmux wire format — the fixed frame header and protocol constants.
//!
//! These values ARE the protocol. Both peers must agree on every byte of the
//! header and on the timing constants below; changing any of them breaks
//! interoperability with existing peers.
//!
//! Multi-byte fields are network byte order. The header derives zerocopy
//! traits, so it is read from and written to byte buffers without any
//! unsafe code.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Precedes every frame on the wire.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct FrameHeader {
    /// One of the `KIND_*` constants.
    pub kind: u8,

    /// Payload length in bytes, not including this header.
    pub length: U16,

    /// Logical stream this frame belongs to. Zero for PING.
    pub stream_id: U16,
}

assert_eq_size!(FrameHeader, [u8; 5]);

impl FrameHeader {
    pub fn new(kind: u8, stream_id: u16, length: u16) -> Self {
        Self {
            kind,
            length: U16::new(length),
            stream_id: U16::new(stream_id),
        }
    }
}

/// Size of [`FrameHeader`] on the wire.
pub const HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

// ── Frame Kinds ──────────────────────────────────────────────────────────────

pub const KIND_SYN: u8 = 0x01;
pub const KIND_OK: u8 = 0x02;
pub const KIND_FAILED: u8 = 0x03;
pub const KIND_DATA: u8 = 0x04;
pub const KIND_ACK: u8 = 0x05;
pub const KIND_FIN: u8 = 0x06;
pub const KIND_DNS: u8 = 0x07;
pub const KIND_ADDR: u8 = 0x08;
pub const KIND_PING: u8 = 0x09;

// ── Failure Codes ────────────────────────────────────────────────────────────

pub const ERR_AUTH: u32 = 1;
pub const ERR_ID_EXISTS: u32 = 2;
pub const ERR_CONNECT_FAILED: u32 = 3;
pub const ERR_TIMEOUT: u32 = 4;
pub const ERR_CLOSED: u32 = 5;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum payload size in bytes. Bounded by the u16 length field.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Interval between keepalive pings, in seconds.
pub const PING_INTERVAL_SECS: u64 = 30;

/// The liveness deadline is this many ping intervals.
pub const LIVENESS_MULTIPLIER: u32 = 6;

/// A session with no streams is closed after this many seconds.
pub const IDLE_CLOSE_SECS: u64 = 10 * 60;

/// Inbound frames buffered per stream before the stream is dropped.
pub const STREAM_QUEUE_CAPACITY: usize = 1024;

/// Hostname lookups served for the peer give up after this many seconds.
pub const LOOKUP_TIMEOUT_SECS: u64 = 60;

// ── Tests ─────────────────────────────────────────────────────────────────────
