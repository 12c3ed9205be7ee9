use crate::connection::{ControlCommand, Stream};
use crate::error::ConnectionError;
use futures::channel::{mpsc, oneshot};
use futures::prelude::*;
use std::time::Duration;

/// A handle to a yamux session.
///
/// Cheap to clone; all clones talk to the same session. Every operation
/// is served by the session's event loop, so the loop must be running
/// (see [`crate::Connection::run`]) for any of them to resolve.
#[derive(Clone, Debug)]
pub struct Control {
    sender: mpsc::Sender<ControlCommand>,
}

impl Control {
    pub(crate) fn new(sender: mpsc::Sender<ControlCommand>) -> Self {
        Control { sender }
    }

    /// Opens a new outbound stream.
    pub async fn open_stream(&mut self) -> Result<Stream, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::OpenStream(tx))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Waits for the next inbound stream, in SYN arrival order.
    pub async fn accept_stream(&mut self) -> Result<Stream, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::AcceptStream(tx))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Measures a round trip to the remote through a PING frame.
    pub async fn ping(&mut self) -> Result<Duration, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::Ping(tx))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Gracefully shuts the session down: announces GO_AWAY, waits for
    /// live streams to finish (bounded by the shutdown timeout), then
    /// closes the pipe. Closing an already closed session succeeds
    /// immediately.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(ControlCommand::CloseConnection(tx)).await.is_err() {
            // already closed
            return Ok(());
        }
        // a dropped notifier means the session died first, which is fine
        let _ = rx.await;
        Ok(())
    }

    /// Whether the session has terminated.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
