//! Latched shutdown signal shared by every task of a session.
//!
//! The first reason recorded wins; later triggers are ignored. Tasks hold a
//! [`ShutdownListener`] and stop once any reason has been recorded.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::CloseReason;

#[derive(Clone)]
pub(crate) struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record `reason` unless one is already set. Returns true if this call set it.
    pub(crate) fn trigger(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub(crate) fn reason(&self) -> Option<CloseReason> {
        self.tx.borrow().clone()
    }

    pub(crate) fn listen(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

pub(crate) struct ShutdownListener {
    rx: watch::Receiver<Option<CloseReason>>,
}

impl ShutdownListener {
    /// Resolve once a reason has been recorded, returning it.
    pub(crate) async fn wait(&mut self) -> CloseReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::Requested),
            // sender gone: the session itself has been dropped
            Err(_) => CloseReason::Requested,
        }
    }
}
