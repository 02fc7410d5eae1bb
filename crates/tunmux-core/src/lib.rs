//! tunmux-core — frame wire format, codec, and session configuration.
//! The session multiplexer in `tunmux` depends on this crate.

pub mod codec;
pub mod config;
pub mod frame;
pub mod wire;

pub use codec::read_frame;
pub use config::{ConfigError, OverflowPolicy, SessionConfig};
pub use frame::{FailReason, Frame, FrameError, FrameKind};
