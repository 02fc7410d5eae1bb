//! Keepalive monitor.
//!
//! Waits for liveness signals (inbound PINGs, plus one seeded at creation).
//! Each signal is answered with a PING one interval later, so two peers keep
//! each other alive without a shared clock. If no signal arrives within the
//! liveness deadline of the last one, the session is closed. The deadline is
//! watched in every state, including while our own PING is stuck on a peer
//! that stopped reading.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tunmux_core::Frame;

use super::Shared;
use crate::error::CloseReason;

/// Stand-in for "never" when a deadline does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

pub(super) async fn run(shared: Arc<Shared>, mut signals: mpsc::Receiver<()>) {
    let mut shutdown = shared.shutdown.listen();
    let interval = shared.config.ping_interval();
    let deadline = shared.config.liveness_deadline();
    let mut last_signal = Instant::now();

    loop {
        let expiry = later(last_signal, deadline);

        tokio::select! {
            _ = shutdown.wait() => return,

            _ = sleep_until(expiry) => {
                tracing::warn!(?deadline, "peer silent past liveness deadline");
                shared.close(CloseReason::KeepaliveTimeout).await;
                return;
            }

            signal = signals.recv() => {
                if signal.is_none() {
                    return;
                }
                last_signal = Instant::now();
                // coalesce a burst into one ping
                while signals.try_recv().is_ok() {}

                let expiry = later(last_signal, deadline);
                let ping_at = later(last_signal, interval).min(expiry);

                tokio::select! {
                    _ = shutdown.wait() => return,
                    _ = sleep_until(ping_at) => {}
                }

                tokio::select! {
                    _ = shutdown.wait() => return,

                    _ = sleep_until(expiry) => {
                        tracing::warn!(?deadline, "ping stuck past liveness deadline");
                        shared.close(CloseReason::KeepaliveTimeout).await;
                        return;
                    }

                    result = shared.writer.write_frame(&Frame::Ping) => match result {
                        Ok(_) => tracing::trace!("ping sent"),
                        Err(e) => tracing::warn!(error = %e, "failed to send ping"),
                    },
                }
            }
        }
    }
}

/// `from + after`, saturating to a far-future instant instead of panicking.
fn later(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}
