//! Write serializer — the only path onto the transport.
//!
//! Each call holds the write lock for one whole frame, so concurrent writers
//! (dispatch loop, SYN/DNS tasks, keepalive, user streams) never interleave
//! bytes. Shutdown does not queue behind the lock: it latches first, every
//! waiting or in-flight write gives up with `SessionError::Closed`, and only
//! then is the transport closed.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tunmux_core::Frame;

use crate::error::SessionError;

pub struct FrameWriter<W> {
    inner: Mutex<Option<W>>,
    closing: watch::Sender<bool>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Some(inner)),
            closing,
        }
    }

    /// Write `buf` as one unit. Returns the number of bytes written, which is
    /// always `buf.len()` on success.
    ///
    /// A write cut short by shutdown may leave part of `buf` on the wire; the
    /// transport is closed right after, so the peer never parses past it.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, SessionError> {
        let mut closing = self.closing.subscribe();
        if *closing.borrow() {
            return Err(SessionError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.inner.lock() => guard,
            _ = closed(&mut closing) => return Err(SessionError::Closed),
        };
        let inner = guard.as_mut().ok_or(SessionError::Closed)?;

        tokio::select! {
            result = write_and_flush(inner, buf) => result?,
            _ = closed(&mut closing) => return Err(SessionError::Closed),
        }
        Ok(buf.len())
    }

    pub async fn write_frame(&self, frame: &Frame) -> Result<usize, SessionError> {
        let bytes = frame.encode()?;
        self.write(&bytes).await
    }

    /// Shut down and drop the transport's write side. Idempotent, and never
    /// waits on a write stuck behind a peer that stopped reading.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.closing.send_replace(true);
        let taken = self.inner.lock().await.take();
        if let Some(mut inner) = taken {
            inner.shutdown().await.map_err(map_write_error)?;
        }
        Ok(())
    }
}

async fn write_and_flush<W>(inner: &mut W, buf: &[u8]) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    inner.write_all(buf).await.map_err(map_write_error)?;
    inner.flush().await.map_err(map_write_error)
}

/// Resolves once shutdown has been latched.
async fn closed(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closing| *closing).await;
}

fn map_write_error(e: io::Error) -> SessionError {
    match e.kind() {
        io::ErrorKind::WriteZero => SessionError::ShortWrite,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => SessionError::Closed,
        _ => SessionError::Io(e),
    }
}
