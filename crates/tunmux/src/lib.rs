//! tunmux — multiplexes many logical streams over one transport connection.
//!
//! A [`Session`] owns one connected byte stream. It routes inbound frames to
//! per-stream queues, answers the peer's SYN and DNS requests through the
//! injected [`Connector`] and [`Resolver`], keeps the connection alive with
//! pings, and closes itself when the peer goes silent or no streams remain.

mod dispatch;
mod error;
mod resolve;
mod session;
mod signal;
mod writer;

pub use error::{CloseReason, SessionError};
pub use resolve::{Connector, RefuseConnector, Resolver, SystemResolver, NETWORK_TCP};
pub use session::{stream_queue, Session, SessionBuilder, StreamEvent, StreamReceiver, StreamSender};
pub use writer::FrameWriter;

pub use tunmux_core::{ConfigError, FailReason, Frame, FrameKind, OverflowPolicy, SessionConfig};
