//! Frame encoding and decoding over a byte pipe.

use crate::connection;
use crate::frame::header::{self, Tag, HEADER_SIZE};
use crate::frame::Frame;
use log::trace;
use strand_traits::{ReadEx, WriteEx};
use std::{fmt, io};

/// Reads frames off the read half of the session pipe.
pub(crate) struct FrameReader<R> {
    id: connection::Id,
    io: R,
    max_body_len: usize,
}

impl<R> FrameReader<R>
where
    R: ReadEx + Unpin,
{
    pub(crate) fn new(id: connection::Id, io: R, max_body_len: usize) -> Self {
        FrameReader { id, io, max_body_len }
    }

    /// Reads the next frame. `Ok(None)` on a clean end of stream between
    /// frames; EOF inside a frame is an error.
    pub(crate) async fn recv_frame(&mut self) -> Result<Option<Frame<()>>, FrameDecodeError> {
        let mut header_buf = [0u8; HEADER_SIZE];
        let n = self.io.read2(&mut header_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            self.io.read_exact2(&mut header_buf[n..]).await?;
        }

        let header = header::decode(&header_buf)?;
        trace!("{}: read frame header: {}", self.id, header);

        let body = if header.tag() == Tag::Data {
            let len = header.len().val() as usize;
            if len > self.max_body_len {
                return Err(FrameDecodeError::FrameTooLarge(len));
            }
            let mut body = vec![0u8; len];
            if len > 0 {
                self.io.read_exact2(&mut body).await?;
            }
            body
        } else {
            Vec::new()
        };

        Ok(Some(Frame { header, body }))
    }
}

/// Writes frames onto the write half of the session pipe.
pub(crate) struct FrameWriter<W> {
    id: connection::Id,
    io: W,
}

impl<W> FrameWriter<W>
where
    W: WriteEx + Unpin,
{
    pub(crate) fn new(id: connection::Id, io: W) -> Self {
        FrameWriter { id, io }
    }

    /// Sends one frame, header and body in a single write so that lower
    /// layers see it as one unit.
    pub(crate) async fn send_frame<T>(&mut self, frame: &Frame<T>) -> io::Result<()> {
        trace!("{}: write frame: {}", self.id, frame.header());

        let header = header::encode(frame.header());
        let mut buf = Vec::with_capacity(HEADER_SIZE + frame.body().len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(frame.body());
        self.io.write_all2(&buf).await?;
        self.io.flush2().await
    }

    pub(crate) async fn close(&mut self) -> io::Result<()> {
        self.io.close2().await
    }
}

/// Errors while decoding an incoming frame.
#[non_exhaustive]
#[derive(Debug)]
pub enum FrameDecodeError {
    /// An I/O error.
    Io(io::Error),
    /// Decoding the frame header failed.
    Header(header::HeaderDecodeError),
    /// A frame body is larger than the configured maximum.
    FrameTooLarge(usize),
}

impl fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameDecodeError::Io(e) => write!(f, "i/o error: {}", e),
            FrameDecodeError::Header(e) => write!(f, "header decode error: {}", e),
            FrameDecodeError::FrameTooLarge(n) => write!(f, "frame body is too large ({})", n),
        }
    }
}

impl std::error::Error for FrameDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameDecodeError::Io(e) => Some(e),
            FrameDecodeError::Header(e) => Some(e),
            FrameDecodeError::FrameTooLarge(_) => None,
        }
    }
}

impl From<io::Error> for FrameDecodeError {
    fn from(e: io::Error) -> Self {
        FrameDecodeError::Io(e)
    }
}

impl From<header::HeaderDecodeError> for FrameDecodeError {
    fn from(e: header::HeaderDecodeError) -> Self {
        FrameDecodeError::Header(e)
    }
}
