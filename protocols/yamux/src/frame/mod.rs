//! Yamux frames: a typed header plus, for DATA frames, a payload.

pub mod header;
pub mod io;

use futures::future::Either;
use header::{Data, GoAway, Header, Ping, StreamId, WindowUpdate};

/// A yamux frame; `T` tracks the frame type.
#[derive(Clone, Debug)]
pub struct Frame<T> {
    header: Header<T>,
    body: Vec<u8>,
}

impl<T> Frame<T> {
    pub fn new(header: Header<T>) -> Self {
        Frame { header, body: Vec::new() }
    }

    pub fn header(&self) -> &Header<T> {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header<T> {
        &mut self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Re-tags the frame. Only used after checking the header tag.
    pub(crate) fn cast<U>(self) -> Frame<U> {
        Frame {
            header: self.header.cast(),
            body: self.body,
        }
    }
}

impl Frame<Data> {
    /// A DATA frame carrying `body`. Body sizes are bounded by the
    /// session config, far below the u32 length field.
    pub fn data(id: StreamId, body: Vec<u8>) -> Self {
        Frame {
            header: Header::data(id, body.len() as u32),
            body,
        }
    }

    /// An empty DATA frame with the FIN flag: an orderly half-close.
    pub fn close_stream(id: StreamId) -> Self {
        let mut header = Header::data(id, 0);
        header.fin();
        Frame { header, body: Vec::new() }
    }

    /// An empty DATA frame with the RST flag: an abrupt termination.
    pub fn reset_stream(id: StreamId) -> Self {
        let mut header = Header::data(id, 0);
        header.rst();
        Frame { header, body: Vec::new() }
    }

    pub(crate) fn left(self) -> Frame<Either<Data, WindowUpdate>> {
        self.cast()
    }
}

impl Frame<WindowUpdate> {
    /// Grants `credit` additional bytes of send window for `id`.
    pub fn window_update(id: StreamId, credit: u32) -> Self {
        Frame::new(Header::window_update(id, credit))
    }

    pub(crate) fn right(self) -> Frame<Either<Data, WindowUpdate>> {
        self.cast()
    }
}

impl Frame<Ping> {
    /// A liveness probe carrying an opaque value the remote echoes back.
    pub fn ping(opaque: u32) -> Self {
        Frame::new(Header::ping(opaque))
    }
}

impl Frame<GoAway> {
    /// Announces an orderly session termination.
    pub fn term() -> Self {
        Frame::new(Header::go_away(header::CODE_TERM))
    }

    /// Announces termination because the remote broke the protocol.
    pub fn protocol_error() -> Self {
        Frame::new(Header::go_away(header::CODE_PROTOCOL_ERROR))
    }
}
