//! Control-plane handlers for SYN and DNS frames.
//!
//! Both hand their slow part (connect, lookup) to a spawned task so the
//! dispatch loop keeps routing frames for every other stream meanwhile.
//! Spawned tasks are not cancelled on session close; their late replies fail
//! with `SessionError::Closed` and are logged.

use std::sync::Arc;

use tracing::Instrument;
use tunmux_core::{FailReason, Frame};

use super::Shared;
use crate::error::CloseReason;
use crate::resolve::NETWORK_TCP;

/// Handle a peer's request to open `stream_id`.
///
/// Returns an error only when the session can no longer be trusted: the
/// synchronous FAILED reply for a duplicate id could not be written.
pub(crate) async fn on_syn(
    shared: &Arc<Shared>,
    stream_id: u16,
    address: String,
) -> Result<(), CloseReason> {
    match shared.table.claim(stream_id) {
        Ok(true) => {}
        Ok(false) => {
            tracing::error!(stream_id, %address, "syn for a stream id that exists");
            let reply = Frame::Failed {
                stream_id,
                reason: FailReason::IdExists,
            };
            if let Err(e) = shared.writer.write_frame(&reply).await {
                tracing::warn!(stream_id, error = %e, "failed to reject duplicate syn");
                return Err(CloseReason::ReplyFailed(stream_id));
            }
            return Ok(());
        }
        Err(e) => {
            tracing::debug!(stream_id, error = %e, "syn after close ignored");
            return Ok(());
        }
    }

    let task = Arc::clone(shared);
    tokio::spawn(connect_stream(task, stream_id, address).instrument(shared.span.clone()));
    Ok(())
}

async fn connect_stream(shared: Arc<Shared>, stream_id: u16, address: String) {
    tracing::debug!(stream_id, %address, "connecting");

    let queue = match shared.connector.connect(NETWORK_TCP, &address, stream_id).await {
        Ok(queue) => queue,
        Err(e) => {
            tracing::warn!(stream_id, %address, error = %e, "connect failed");
            // release first so the id is free by the time the peer sees FAILED
            if let Err(e) = shared.table.remove(stream_id) {
                tracing::debug!(stream_id, error = %e, "reservation already gone");
            }
            let reply = Frame::Failed {
                stream_id,
                reason: FailReason::ConnectFailed,
            };
            if let Err(e) = shared.writer.write_frame(&reply).await {
                tracing::warn!(stream_id, error = %e, "failed to send FAILED");
            }
            return;
        }
    };

    if let Err(e) = shared.table.reserve(stream_id, Some(queue)) {
        tracing::warn!(stream_id, %address, error = %e, "session closed while connecting");
        return;
    }

    if let Err(e) = shared.writer.write_frame(&Frame::Ok { stream_id }).await {
        tracing::warn!(stream_id, error = %e, "failed to send OK");
        return;
    }
    tracing::info!(stream_id, %address, "stream connected");
}

/// Resolve `hostname` for the peer and answer with ADDR on `stream_id`.
pub(crate) fn on_dns(shared: &Arc<Shared>, stream_id: u16, hostname: String) {
    let task = Arc::clone(shared);
    tokio::spawn(
        async move {
            let addresses = match task.resolver.resolve(&hostname).await {
                Ok(addresses) => addresses,
                Err(e) => {
                    tracing::warn!(stream_id, %hostname, error = %e, "lookup failed");
                    Vec::new()
                }
            };
            tracing::debug!(stream_id, %hostname, count = addresses.len(), "lookup done");

            let reply = Frame::Addr {
                stream_id,
                addresses,
            };
            if let Err(e) = task.writer.write_frame(&reply).await {
                tracing::warn!(stream_id, error = %e, "failed to send ADDR");
            }
        }
        .instrument(shared.span.clone()),
    );
}
