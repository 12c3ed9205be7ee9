use crate::frame::io::FrameDecodeError;
use thiserror::Error;
use std::io;

/// Errors of a yamux connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame decode error: {0}")]
    Decode(#[from] FrameDecodeError),

    #[error("stream id range exhausted")]
    NoMoreStreamIds,

    #[error("connection is closed")]
    Closed,

    #[error("maximum number of streams reached")]
    TooManyStreams,

    #[error("keep-alive timed out")]
    KeepAliveTimeout,

    #[error("remote misbehaved: {0}")]
    ProtocolViolation(&'static str),

    #[error("remote terminated the connection (go away code {0})")]
    GoAwayReceived(u32),
}
