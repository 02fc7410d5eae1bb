//! Dispatch loop — the single reader of a session's transport.
//!
//! Frames are routed strictly in arrival order: stream-scoped frames go to
//! their stream's queue, SYN and DNS go to the control-plane handlers, PING
//! feeds the keepalive monitor. The loop never blocks on a slow consumer.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc::error::TrySendError;
use tunmux_core::{read_frame, Frame, FrameError, OverflowPolicy};

use crate::error::CloseReason;
use crate::session::{on_dns, on_syn, Shared, Slot, StreamEvent, StreamTable};

/// Outcome of handing a frame to its stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// No such stream. Usually a late frame for a stream already closed.
    UnknownStream,
    /// The stream is reserved but its consumer is not connected yet.
    NotConnected,
    /// The queue was full. The frame is lost and the stream removed.
    Overflowed,
    /// The consumer dropped its queue. The stream is removed.
    ConsumerGone,
}

pub(crate) async fn run<R>(shared: Arc<Shared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut shutdown = shared.shutdown.listen();

    let reason = loop {
        let frame = tokio::select! {
            reason = shutdown.wait() => break reason,

            result = read_frame(&mut reader) => match result {
                Ok(frame) => frame,
                Err(FrameError::UnknownKind(kind)) => {
                    tracing::error!(kind, "unexpected frame kind");
                    break CloseReason::ProtocolViolation(kind);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "read frame failed");
                    break CloseReason::Transport(e.to_string());
                }
            },
        };

        if let Err(reason) = route(&shared, frame).await {
            break reason;
        }
    };

    shared.close(reason).await;
}

async fn route(shared: &Arc<Shared>, frame: Frame) -> Result<(), CloseReason> {
    match frame {
        Frame::Ok { .. }
        | Frame::Failed { .. }
        | Frame::Data { .. }
        | Frame::Ack { .. }
        | Frame::Fin { .. }
        | Frame::Addr { .. } => {
            let stream_id = frame.stream_id();
            match enqueue(&shared.table, frame) {
                Delivery::Overflowed
                    if shared.config.overflow_policy == OverflowPolicy::CloseSession =>
                {
                    Err(CloseReason::StreamOverflow(stream_id))
                }
                _ => Ok(()),
            }
        }
        Frame::Syn { stream_id, address } => on_syn(shared, stream_id, address).await,
        Frame::Dns { stream_id, hostname } => {
            on_dns(shared, stream_id, hostname);
            Ok(())
        }
        Frame::Ping => {
            // one pending signal is enough; extras are dropped
            let _ = shared.ping_signal.try_send(());
            Ok(())
        }
    }
}

/// Hand `frame` to its stream's queue without ever waiting for room.
pub(crate) fn enqueue(table: &StreamTable, frame: Frame) -> Delivery {
    let stream_id = frame.stream_id();
    let kind = frame.kind();

    let queue = match table.lookup(stream_id) {
        Slot::Bound(queue) => queue,
        Slot::Missing => {
            tracing::warn!(stream_id, ?kind, "frame for unknown stream dropped");
            return Delivery::UnknownStream;
        }
        Slot::Reserved => {
            // deliberately not treated as overflow: the connect in flight keeps its id
            tracing::warn!(stream_id, ?kind, "frame for unconnected stream dropped");
            return Delivery::NotConnected;
        }
    };

    let delivery = match queue.try_send(StreamEvent::Frame(frame)) {
        Ok(()) => {
            tracing::debug!(stream_id, ?kind, "frame routed");
            return Delivery::Delivered;
        }
        Err(TrySendError::Full(_)) => {
            tracing::warn!(stream_id, ?kind, "stream queue full, dropping stream");
            Delivery::Overflowed
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(stream_id, ?kind, "stream consumer gone, dropping stream");
            Delivery::ConsumerGone
        }
    };

    drop(queue);
    if let Err(e) = table.remove(stream_id) {
        tracing::debug!(stream_id, error = %e, "stream already removed");
    }
    delivery
}
