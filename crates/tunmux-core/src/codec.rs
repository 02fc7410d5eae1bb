//! Reading frames off an async byte stream.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use zerocopy::FromBytes;

use crate::frame::{Frame, FrameError, FrameKind};
use crate::wire::{FrameHeader, HEADER_LEN};

/// Read exactly one frame from `reader`.
///
/// A peer that closes between frames surfaces as `FrameError::Io` with
/// `UnexpectedEof`; so does one that closes mid-frame. An unknown kind byte
/// is reported before the payload is consumed, since the stream cannot be
/// trusted past that point anyway.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head).await?;

    let header = FrameHeader::read_from(&head[..])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "short frame header"))?;
    FrameKind::try_from(header.kind)?;

    let mut payload = BytesMut::zeroed(header.length.get() as usize);
    reader.read_exact(&mut payload).await?;

    Frame::decode(&header, payload.freeze())
}
