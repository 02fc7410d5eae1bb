//! Session — one physical connection and every stream multiplexed over it.

mod handlers;
mod keepalive;
mod table;

pub use table::{stream_queue, StreamEvent, StreamReceiver, StreamSender};

pub(crate) use handlers::{on_dns, on_syn};
pub(crate) use table::{Slot, StreamTable};

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{Instrument, Span};
use tunmux_core::{ConfigError, Frame, SessionConfig};

use crate::dispatch;
use crate::error::{CloseReason, SessionError};
use crate::resolve::{Connector, RefuseConnector, Resolver, SystemResolver};
use crate::signal::ShutdownSignal;
use crate::writer::FrameWriter;

/// Pending liveness signals kept before extra ones are dropped.
const PING_SIGNAL_CAPACITY: usize = 3;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared by the session handle and all of its tasks.
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) writer: FrameWriter<BoxedWriter>,
    pub(crate) table: StreamTable,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) ping_signal: mpsc::Sender<()>,
    pub(crate) shutdown: ShutdownSignal,
    pub(crate) span: Span,
    closed: AtomicBool,
}

impl Shared {
    /// Tear the session down. Only the first call does anything.
    pub(crate) async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.trigger(reason);
        let reason = self.shutdown.reason().unwrap_or(CloseReason::Requested);

        let open = self.table.close_all();
        tracing::warn!(?reason, streams = open, "closing session");

        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
    }
}

/// Handle to a running session. Cheap to clone; every clone refers to the
/// same connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Start a session with default configuration and the given connector.
    pub fn new<T, C>(transport: T, connector: C) -> Session
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        C: Connector,
    {
        SessionBuilder::new().connector(connector).start(transport)
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Number of streams in the table, reserved ones included.
    pub fn stream_count(&self) -> usize {
        self.shared.table.count()
    }

    /// True while the table is empty and the idle-close timer is counting.
    pub fn idle_close_armed(&self) -> bool {
        self.shared.table.idle_armed()
    }

    pub fn has_stream(&self, stream_id: u16) -> bool {
        self.shared.table.contains(stream_id)
    }

    /// Register a locally-originated stream at the next free id.
    pub fn open_stream(&self, queue: StreamSender) -> Result<u16, SessionError> {
        self.shared.table.allocate(queue)
    }

    /// Bind `queue` at a caller-chosen id, replacing whatever was there.
    pub fn bind_stream(&self, stream_id: u16, queue: StreamSender) -> Result<(), SessionError> {
        self.shared.table.reserve(stream_id, Some(queue))
    }

    pub fn remove_stream(&self, stream_id: u16) -> Result<(), SessionError> {
        self.shared.table.remove(stream_id)
    }

    /// Write pre-encoded bytes to the transport as one unit.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, SessionError> {
        self.shared.writer.write(buf).await
    }

    pub async fn write_frame(&self, frame: &Frame) -> Result<usize, SessionError> {
        self.shared.writer.write_frame(frame).await
    }

    /// Ask the peer to open a stream to `address`.
    ///
    /// Resolves once the peer answers. On OK the stream stays registered and
    /// its queue is returned; on FAILED the id is released again.
    pub async fn dial(&self, address: &str) -> Result<(u16, StreamReceiver), SessionError> {
        let (tx, mut rx) = stream_queue(self.shared.config.queue_capacity);
        let stream_id = self.shared.table.allocate(tx)?;

        let syn = Frame::Syn {
            stream_id,
            address: address.to_owned(),
        };
        if let Err(e) = self.shared.writer.write_frame(&syn).await {
            let _ = self.shared.table.remove(stream_id);
            return Err(e);
        }

        match rx.recv().await {
            Some(StreamEvent::Frame(Frame::Ok { .. })) => {
                tracing::debug!(stream_id, address, "stream opened");
                Ok((stream_id, rx))
            }
            Some(StreamEvent::Frame(Frame::Failed { reason, .. })) => {
                let _ = self.shared.table.remove(stream_id);
                Err(SessionError::Rejected { stream_id, reason })
            }
            Some(StreamEvent::Frame(other)) => {
                let _ = self.shared.table.remove(stream_id);
                Err(SessionError::Unexpected(other.kind()))
            }
            Some(StreamEvent::Closed) | None => Err(SessionError::Closed),
        }
    }

    /// Have the peer resolve `hostname`. The peer reports lookup failure as
    /// an empty list.
    pub async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, SessionError> {
        let (tx, mut rx) = stream_queue(1);
        let stream_id = self.shared.table.allocate(tx)?;

        let dns = Frame::Dns {
            stream_id,
            hostname: hostname.to_owned(),
        };
        let answer = match self.shared.writer.write_frame(&dns).await {
            Ok(_) => rx.recv().await,
            Err(e) => {
                let _ = self.shared.table.remove(stream_id);
                return Err(e);
            }
        };
        let _ = self.shared.table.remove(stream_id);

        match answer {
            Some(StreamEvent::Frame(Frame::Addr { addresses, .. })) => Ok(addresses),
            Some(StreamEvent::Frame(other)) => Err(SessionError::Unexpected(other.kind())),
            Some(StreamEvent::Closed) | None => Err(SessionError::Closed),
        }
    }

    /// Close the session: every open stream sees `StreamEvent::Closed` and
    /// the transport is shut down. Idempotent.
    pub async fn close(&self) {
        self.shared.close(CloseReason::Requested).await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.reason().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.shutdown.reason()
    }

    /// Wait until the session has been closed, for whatever reason.
    pub async fn closed(&self) -> CloseReason {
        self.shared.shutdown.listen().wait().await
    }
}

/// Configures and starts a [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    connector: Option<Arc<dyn Connector>>,
    resolver: Option<Arc<dyn Resolver>>,
    span: Option<Span>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            connector: None,
            resolver: None,
            span: None,
        }
    }

    /// Use `config` instead of the defaults. Rejects a config that fails
    /// [`SessionConfig::validate`], so a running session never sees one.
    pub fn config(mut self, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Called for every SYN the peer sends. Defaults to [`RefuseConnector`].
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Answers the peer's DNS requests. Defaults to [`SystemResolver`].
    pub fn resolver(mut self, resolver: impl Resolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Span every session task logs under. Defaults to an `info` span named
    /// `session`.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Take ownership of `transport` and spawn the dispatch and keepalive
    /// tasks. Must be called inside a tokio runtime.
    pub fn start<T>(self, transport: T) -> Session
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let config = self.config;
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("session"));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(RefuseConnector) as Arc<dyn Connector>);
        let resolver = self
            .resolver
            .unwrap_or_else(|| {
                Arc::new(SystemResolver::new(config.lookup_timeout())) as Arc<dyn Resolver>
            });

        let (reader, writer) = tokio::io::split(transport);
        let (ping_signal, signals) = mpsc::channel(PING_SIGNAL_CAPACITY);
        let shutdown = ShutdownSignal::new();
        let table = StreamTable::new(config.idle_close(), shutdown.clone(), span.clone());

        let shared = Arc::new(Shared {
            config,
            writer: FrameWriter::new(Box::new(writer) as BoxedWriter),
            table,
            connector,
            resolver,
            ping_signal,
            shutdown,
            span: span.clone(),
            closed: AtomicBool::new(false),
        });

        // creation counts as the first liveness signal
        let _ = shared.ping_signal.try_send(());
        span.in_scope(|| tracing::info!("session created"));

        tokio::spawn(keepalive::run(shared.clone(), signals).instrument(span.clone()));
        tokio::spawn(dispatch::run(shared.clone(), reader).instrument(span));

        Session { shared }
    }
}
