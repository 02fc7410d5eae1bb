//! Stream table — stream id → inbound queue, plus id allocation and the
//! idle-close timer.
//!
//! One mutex guards the whole table. It is held for map operations only,
//! never across an await or a channel send that could block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};
use tunmux_core::Frame;

use crate::error::{CloseReason, SessionError};
use crate::signal::ShutdownSignal;

/// What a stream's consumer receives.
#[derive(Debug)]
pub enum StreamEvent {
    Frame(Frame),
    /// The session closed. Nothing more will arrive.
    Closed,
}

pub type StreamSender = mpsc::Sender<StreamEvent>;
pub type StreamReceiver = mpsc::Receiver<StreamEvent>;

/// Create a bounded inbound queue for one stream.
pub fn stream_queue(capacity: usize) -> (StreamSender, StreamReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Result of looking up a stream id.
pub(crate) enum Slot {
    Missing,
    /// Claimed by a SYN whose connect has not finished.
    Reserved,
    Bound(StreamSender),
}

struct TableState {
    next_id: u16,
    /// `None` marks a reserved id with no consumer yet.
    streams: HashMap<u16, Option<StreamSender>>,
    idle_timer: Option<JoinHandle<()>>,
    /// Bumped on every arm so a timer that lost the race to a disarm can tell.
    idle_generation: u64,
    closed: bool,
}

impl TableState {
    fn disarm_idle(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
            tracing::trace!("idle close disarmed");
        }
    }
}

pub(crate) struct StreamTable {
    state: Arc<Mutex<TableState>>,
    idle_close: Duration,
    shutdown: ShutdownSignal,
    span: Span,
    /// Runtime the table was created on. Timers are spawned here so removal
    /// works from any thread.
    runtime: Option<Handle>,
}

impl StreamTable {
    pub(crate) fn new(idle_close: Duration, shutdown: ShutdownSignal, span: Span) -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                next_id: 0,
                streams: HashMap::new(),
                idle_timer: None,
                idle_generation: 0,
                closed: false,
            })),
            idle_close,
            shutdown,
            span,
            runtime: Handle::try_current().ok(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `queue` at the next free id, scanning forward from the last
    /// allocation and wrapping at u16::MAX.
    pub(crate) fn allocate(&self, queue: StreamSender) -> Result<u16, SessionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SessionError::Closed);
        }

        let start = state.next_id;
        let mut id = start;
        while state.streams.contains_key(&id) {
            id = id.wrapping_add(1);
            if id == start {
                tracing::warn!(streams = state.streams.len(), "run out of stream ids");
                return Err(SessionError::ExhaustedIdSpace);
            }
        }

        state.streams.insert(id, Some(queue));
        state.next_id = id.wrapping_add(1);
        state.disarm_idle();
        tracing::debug!(stream_id = id, "stream id allocated");
        Ok(id)
    }

    /// Insert or overwrite the entry at `id`. `None` reserves the id without
    /// a consumer. On a closed table the queue, if any, receives the closed
    /// sentinel instead.
    pub(crate) fn reserve(&self, id: u16, queue: Option<StreamSender>) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.closed {
            if let Some(queue) = queue {
                let _ = queue.try_send(StreamEvent::Closed);
            }
            return Err(SessionError::Closed);
        }
        tracing::debug!(stream_id = id, bound = queue.is_some(), "stream id reserved");
        state.streams.insert(id, queue);
        state.disarm_idle();
        Ok(())
    }

    /// Reserve `id` only if it is free. Returns false if it is already taken.
    pub(crate) fn claim(&self, id: u16) -> Result<bool, SessionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SessionError::Closed);
        }
        if state.streams.contains_key(&id) {
            return Ok(false);
        }
        state.streams.insert(id, None);
        state.disarm_idle();
        Ok(true)
    }

    /// Delete the entry at `id`. Arms the idle-close timer if this empties
    /// the table.
    pub(crate) fn remove(&self, id: u16) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.streams.remove(&id).is_none() {
            return Err(SessionError::UnknownStream(id));
        }
        tracing::debug!(stream_id = id, remaining = state.streams.len(), "stream removed");
        if state.streams.is_empty() && !state.closed {
            self.arm_idle(&mut state);
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, id: u16) -> Slot {
        match self.lock().streams.get(&id) {
            None => Slot::Missing,
            Some(None) => Slot::Reserved,
            Some(Some(queue)) => Slot::Bound(queue.clone()),
        }
    }

    pub(crate) fn contains(&self, id: u16) -> bool {
        self.lock().streams.contains_key(&id)
    }

    pub(crate) fn count(&self) -> usize {
        self.lock().streams.len()
    }

    pub(crate) fn idle_armed(&self) -> bool {
        self.lock().idle_timer.is_some()
    }

    /// Empty the table for session close. Every bound queue gets the closed
    /// sentinel if it has room; a full queue still ends when its sender drops.
    /// Returns the number of entries that were open.
    pub(crate) fn close_all(&self) -> usize {
        let streams = {
            let mut state = self.lock();
            state.closed = true;
            state.disarm_idle();
            std::mem::take(&mut state.streams)
        };
        let open = streams.len();
        for (stream_id, queue) in streams {
            if let Some(queue) = queue {
                if queue.try_send(StreamEvent::Closed).is_err() {
                    tracing::debug!(stream_id, "queue full, closed sentinel dropped");
                }
            }
        }
        open
    }

    fn arm_idle(&self, state: &mut TableState) {
        if state.idle_timer.is_some() {
            return;
        }
        let Some(runtime) = &self.runtime else {
            tracing::warn!("table created outside a runtime, idle close not armed");
            return;
        };
        state.idle_generation += 1;
        let generation = state.idle_generation;
        let after = self.idle_close;
        let table = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();

        tracing::debug!(?after, "no streams left, idle close armed");
        state.idle_timer = Some(runtime.spawn(
            async move {
                tokio::time::sleep(after).await;
                {
                    let mut state = table.lock().unwrap_or_else(PoisonError::into_inner);
                    if state.idle_generation != generation || !state.streams.is_empty() {
                        return;
                    }
                    state.idle_timer = None;
                }
                tracing::info!(?after, "session idle, closing");
                shutdown.trigger(CloseReason::IdleTimeout);
            }
            .instrument(self.span.clone()),
        ));
    }
}
