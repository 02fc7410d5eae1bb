//! Frame types — the closed set of messages exchanged over a session.
//!
//! Every frame except PING is scoped to a stream id. Stream-scoped payloads
//! are opaque to the session; it only needs [`Frame::stream_id`] and
//! [`Frame::kind`] to route them.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zerocopy::AsBytes;

use crate::wire::*;

/// Discriminant of a [`Frame`], matching the wire `kind` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Syn = KIND_SYN,
    Ok = KIND_OK,
    Failed = KIND_FAILED,
    Data = KIND_DATA,
    Ack = KIND_ACK,
    Fin = KIND_FIN,
    Dns = KIND_DNS,
    Addr = KIND_ADDR,
    Ping = KIND_PING,
}

impl TryFrom<u8> for FrameKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            KIND_SYN => Ok(FrameKind::Syn),
            KIND_OK => Ok(FrameKind::Ok),
            KIND_FAILED => Ok(FrameKind::Failed),
            KIND_DATA => Ok(FrameKind::Data),
            KIND_ACK => Ok(FrameKind::Ack),
            KIND_FIN => Ok(FrameKind::Fin),
            KIND_DNS => Ok(FrameKind::Dns),
            KIND_ADDR => Ok(FrameKind::Addr),
            KIND_PING => Ok(FrameKind::Ping),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(k: FrameKind) -> u8 {
        k as u8
    }
}

/// Reason code carried by a FAILED frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    Auth,
    /// The peer asked to open a stream id that is already in use.
    IdExists,
    /// The local side of the stream could not be established.
    ConnectFailed,
    Timeout,
    Closed,
    /// A code this build does not know. Preserved so it can be reported.
    Other(u32),
}

impl From<u32> for FailReason {
    fn from(code: u32) -> Self {
        match code {
            ERR_AUTH => FailReason::Auth,
            ERR_ID_EXISTS => FailReason::IdExists,
            ERR_CONNECT_FAILED => FailReason::ConnectFailed,
            ERR_TIMEOUT => FailReason::Timeout,
            ERR_CLOSED => FailReason::Closed,
            other => FailReason::Other(other),
        }
    }
}

impl From<FailReason> for u32 {
    fn from(r: FailReason) -> u32 {
        match r {
            FailReason::Auth => ERR_AUTH,
            FailReason::IdExists => ERR_ID_EXISTS,
            FailReason::ConnectFailed => ERR_CONNECT_FAILED,
            FailReason::Timeout => ERR_TIMEOUT,
            FailReason::Closed => ERR_CLOSED,
            FailReason::Other(code) => code,
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Auth => f.write_str("authentication failed"),
            FailReason::IdExists => f.write_str("stream id exists"),
            FailReason::ConnectFailed => f.write_str("connect failed"),
            FailReason::Timeout => f.write_str("timed out"),
            FailReason::Closed => f.write_str("closed"),
            FailReason::Other(code) => write!(f, "error code {code}"),
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Open a stream at a sender-chosen id, connecting to `address`.
    Syn { stream_id: u16, address: String },
    /// The stream open was accepted.
    Ok { stream_id: u16 },
    /// A stream open or operation was rejected.
    Failed { stream_id: u16, reason: FailReason },
    Data { stream_id: u16, payload: Bytes },
    /// Flow-control acknowledgment, carrying the receiver's window.
    Ack { stream_id: u16, window: u32 },
    Fin { stream_id: u16 },
    /// Ask the peer to resolve `hostname`.
    Dns { stream_id: u16, hostname: String },
    /// Answer to a DNS request. An empty list means the lookup failed.
    Addr { stream_id: u16, addresses: Vec<IpAddr> },
    Ping,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Syn { .. } => FrameKind::Syn,
            Frame::Ok { .. } => FrameKind::Ok,
            Frame::Failed { .. } => FrameKind::Failed,
            Frame::Data { .. } => FrameKind::Data,
            Frame::Ack { .. } => FrameKind::Ack,
            Frame::Fin { .. } => FrameKind::Fin,
            Frame::Dns { .. } => FrameKind::Dns,
            Frame::Addr { .. } => FrameKind::Addr,
            Frame::Ping => FrameKind::Ping,
        }
    }

    /// Stream this frame belongs to. PING is not stream-scoped and reports 0.
    pub fn stream_id(&self) -> u16 {
        match self {
            Frame::Syn { stream_id, .. }
            | Frame::Ok { stream_id }
            | Frame::Failed { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::Ack { stream_id, .. }
            | Frame::Fin { stream_id }
            | Frame::Dns { stream_id, .. }
            | Frame::Addr { stream_id, .. } => *stream_id,
            Frame::Ping => 0,
        }
    }

    /// Encode header and payload into one buffer, ready for a single write.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut payload = BytesMut::new();
        match self {
            Frame::Syn { address, .. } => payload.put_slice(address.as_bytes()),
            Frame::Dns { hostname, .. } => payload.put_slice(hostname.as_bytes()),
            Frame::Failed { reason, .. } => payload.put_u32(u32::from(*reason)),
            Frame::Ack { window, .. } => payload.put_u32(*window),
            Frame::Data { payload: data, .. } => payload.put_slice(data),
            Frame::Addr { addresses, .. } => {
                for addr in addresses {
                    match addr {
                        IpAddr::V4(v4) => {
                            payload.put_u8(4);
                            payload.put_slice(&v4.octets());
                        }
                        IpAddr::V6(v6) => {
                            payload.put_u8(16);
                            payload.put_slice(&v6.octets());
                        }
                    }
                }
            }
            Frame::Ok { .. } | Frame::Fin { .. } | Frame::Ping => {}
        }

        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }

        let header = FrameHeader::new(self.kind().into(), self.stream_id(), payload.len() as u16);
        let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
        out.put_slice(header.as_bytes());
        out.put_slice(&payload);
        Ok(out.freeze())
    }

    /// Build a frame from a parsed header and its complete payload.
    pub fn decode(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
        let kind = FrameKind::try_from(header.kind)?;
        let stream_id = header.stream_id.get();

        let frame = match kind {
            FrameKind::Syn => Frame::Syn {
                stream_id,
                address: utf8(kind, payload)?,
            },
            FrameKind::Dns => Frame::Dns {
                stream_id,
                hostname: utf8(kind, payload)?,
            },
            FrameKind::Ok => Frame::Ok { stream_id },
            FrameKind::Fin => Frame::Fin { stream_id },
            FrameKind::Ping => Frame::Ping,
            FrameKind::Failed => Frame::Failed {
                stream_id,
                reason: FailReason::from(fixed_u32(kind, &mut payload)?),
            },
            FrameKind::Ack => Frame::Ack {
                stream_id,
                window: fixed_u32(kind, &mut payload)?,
            },
            FrameKind::Data => Frame::Data { stream_id, payload },
            FrameKind::Addr => {
                let mut addresses = Vec::new();
                while payload.has_remaining() {
                    let len = payload.get_u8() as usize;
                    if payload.remaining() < len {
                        return Err(FrameError::Malformed {
                            kind,
                            reason: "truncated address",
                        });
                    }
                    let addr = match len {
                        4 => {
                            let mut octets = [0u8; 4];
                            payload.copy_to_slice(&mut octets);
                            IpAddr::V4(Ipv4Addr::from(octets))
                        }
                        16 => {
                            let mut octets = [0u8; 16];
                            payload.copy_to_slice(&mut octets);
                            IpAddr::V6(Ipv6Addr::from(octets))
                        }
                        _ => {
                            return Err(FrameError::Malformed {
                                kind,
                                reason: "address length must be 4 or 16",
                            })
                        }
                    };
                    addresses.push(addr);
                }
                Frame::Addr {
                    stream_id,
                    addresses,
                }
            }
        };
        Ok(frame)
    }
}

fn utf8(kind: FrameKind, payload: Bytes) -> Result<String, FrameError> {
    String::from_utf8(payload.to_vec()).map_err(|_| FrameError::Malformed {
        kind,
        reason: "payload is not utf-8",
    })
}

fn fixed_u32(kind: FrameKind, payload: &mut Bytes) -> Result<u32, FrameError> {
    if payload.len() != 4 {
        return Err(FrameError::Malformed {
            kind,
            reason: "expected a 4 byte payload",
        });
    }
    Ok(payload.get_u32())
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while reading or building frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("malformed {kind:?} frame: {reason}")]
    Malformed {
        kind: FrameKind,
        reason: &'static str,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
