use tunmux_core::{FailReason, FrameError, FrameKind};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("run out of stream ids")]
    ExhaustedIdSpace,

    #[error("stream {0} does not exist")]
    UnknownStream(u16),

    #[error("session closed")]
    Closed,

    #[error("short write")]
    ShortWrite,

    #[error("stream {stream_id} rejected by peer: {reason}")]
    Rejected { stream_id: u16, reason: FailReason },

    #[error("unexpected {0:?} frame on stream")]
    Unexpected(FrameKind),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("transport: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a session was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `Session::close` was called.
    Requested,
    /// Reading from the transport failed, including a clean peer close.
    Transport(String),
    /// The peer sent a frame kind outside the protocol.
    ProtocolViolation(u8),
    /// No liveness signal within the deadline.
    KeepaliveTimeout,
    /// No streams for the idle-close interval.
    IdleTimeout,
    /// A stream's queue overflowed under `OverflowPolicy::CloseSession`.
    StreamOverflow(u16),
    /// A control reply the dispatch loop had to write could not be sent.
    ReplyFailed(u16),
}
