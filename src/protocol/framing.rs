//! Frame boundaries on the byte stream.
//!
//! A frame is exactly one complete JSON object. The controller does not
//! length-prefix its messages, so [`FrameReader`] accumulates reads in a
//! buffer and cuts frames on JSON value boundaries: a reply split over several
//! reads is reassembled, and several replies arriving in one read are handed
//! out one at a time. Whitespace between objects (including the `\n` this
//! client appends to its own requests) is skipped.

use crate::error::{DecodeError, LinkError, LinkResult, ProtocolViolation};
use bytes::{Buf, Bytes, BytesMut};
use serde::de::IgnoredAny;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on buffered bytes for a single frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Incremental reader that yields one JSON object per call.
///
/// The buffer lives in the reader, not in the read future, so abandoning a
/// [`read_frame`](Self::read_frame) call (for instance when a reply timeout
/// fires) loses no bytes. A late reply stays buffered and surfaces on the next
/// call, where the correlation check rejects it.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_len: usize,
}

enum Scan {
    Frame(usize),
    Incomplete,
    Malformed(serde_json::Error),
}

impl FrameReader {
    /// Create a reader that gives up on frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_frame_len,
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read the next complete frame.
    ///
    /// # Errors
    ///
    /// - `Transport` on a read error, or `UnexpectedEof` if the peer closes
    ///   the stream before a frame completes
    /// - `ProtocolMismatch` with [`DecodeError::Malformed`] if the buffered
    ///   bytes cannot start a JSON value; input up to the next newline is
    ///   discarded so the reader can resynchronize
    /// - `ProtocolMismatch` with [`ProtocolViolation::FrameTooLarge`] if more
    ///   than `max_frame_len` bytes accumulate without a complete frame
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> LinkResult<Bytes>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            match self.scan() {
                Scan::Frame(end) => return Ok(self.buffer.split_to(end).freeze()),
                Scan::Malformed(e) => {
                    self.discard_line();
                    return Err(ProtocolViolation::from(DecodeError::Malformed(e)).into());
                }
                Scan::Incomplete => {}
            }

            if self.buffer.len() > self.max_frame_len {
                self.buffer.clear();
                return Err(ProtocolViolation::FrameTooLarge {
                    limit: self.max_frame_len,
                }
                .into());
            }

            self.buffer.reserve(READ_CHUNK);
            let n = reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(LinkError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the stream",
                )));
            }
        }
    }

    fn scan(&mut self) -> Scan {
        let leading = self
            .buffer
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buffer.advance(leading);
        if self.buffer.is_empty() {
            return Scan::Incomplete;
        }

        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<IgnoredAny>();
        match stream.next() {
            Some(Ok(IgnoredAny)) => Scan::Frame(stream.byte_offset()),
            Some(Err(e)) if e.is_eof() => Scan::Incomplete,
            Some(Err(e)) => Scan::Malformed(e),
            None => Scan::Incomplete,
        }
    }

    fn discard_line(&mut self) {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => self.buffer.advance(pos + 1),
            None => self.buffer.clear(),
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

/// Write one encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
