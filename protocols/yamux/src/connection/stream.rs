use crate::chunks::Chunks;
use crate::connection::{self, StreamCommand};
use crate::frame::header::StreamId;
use crate::frame::Frame;
use crate::Config;
use futures::channel::mpsc;
use futures::future::Either;
use futures::prelude::*;
use futures_timer::Delay;
use log::trace;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};
use std::{fmt, io};

/// The state of a yamux stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Open bidirectionally.
    Open,
    /// We sent FIN; open for incoming data only.
    SendClosed,
    /// The remote sent FIN; open for outgoing data only.
    RecvClosed,
    /// Closed in both directions (terminal state).
    Closed,
}

enum ReadOutcome {
    Read(usize, Option<u32>),
    Eof,
    WouldBlock(Option<Instant>),
}

impl State {
    /// Can we receive data in this state?
    pub fn can_read(self) -> bool {
        !matches!(self, State::RecvClosed | State::Closed)
    }

    /// Can we send data in this state?
    pub fn can_write(self) -> bool {
        !matches!(self, State::SendClosed | State::Closed)
    }
}

/// A multiplexed yamux stream.
///
/// Handles are cheap clones sharing the same stream state; the session
/// keeps one for frame dispatch and hands others to the application.
pub struct Stream {
    id: StreamId,
    conn: connection::Id,
    config: Arc<Config>,
    sender: mpsc::Sender<StreamCommand>,
    shared: Arc<Mutex<Shared>>,
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        Stream {
            id: self.id,
            conn: self.conn,
            config: self.config.clone(),
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id.val())
            .field("connection", &self.conn)
            .finish()
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(Stream {}/{})", self.conn, self.id.val())
    }
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        conn: connection::Id,
        config: Arc<Config>,
        window: u32,
        credit: u32,
        sender: mpsc::Sender<StreamCommand>,
    ) -> Self {
        Stream {
            id,
            conn,
            config,
            sender,
            shared: Arc::new(Mutex::new(Shared::new(window, credit))),
        }
    }

    /// This stream's identifier.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The application protocol selected for this stream, if any.
    pub fn protocol(&self) -> Option<String> {
        self.shared().protocol.clone()
    }

    /// Records the application protocol selected for this stream.
    pub fn set_protocol(&mut self, proto: &str) {
        self.shared().protocol = Some(proto.to_owned());
    }

    /// Sets the absolute deadline for subsequent reads.
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.shared().read_deadline = deadline;
    }

    /// Whether the stream was terminated by a reset.
    pub fn is_reset(&self) -> bool {
        self.shared().reset
    }

    pub(crate) fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Abruptly terminates the stream. Buffered unread data is dropped,
    /// pending reads observe end-of-stream, pending writes fail.
    pub async fn reset(&mut self) -> io::Result<()> {
        let already_dead = {
            let mut shared = self.shared();
            if shared.reset || shared.session_closed || shared.state() == State::Closed {
                true
            } else {
                shared.mark_reset();
                false
            }
        };
        if !already_dead {
            trace!("{}/{}: reset", self.conn, self.id);
            // the session being gone is fine, the stream dies with it
            let _ = self.sender.send(StreamCommand::ResetStream(self.id)).await;
        }
        Ok(())
    }

    fn try_read(&self, buf: &mut [u8]) -> ReadOutcome {
        let mut shared = self.shared();
        if !shared.buffer.is_empty() {
            let n = shared.buffer.consume(buf);
            trace!("{}/{}: read {} bytes", self.conn, self.id, n);
            let update = shared.prepare_window_update(&self.config);
            return ReadOutcome::Read(n, update);
        }
        // empty buffer: EOF on half-close, reset or session end
        if shared.reset || shared.session_closed || !shared.state().can_read() {
            trace!("{}/{}: eof", self.conn, self.id);
            return ReadOutcome::Eof;
        }
        ReadOutcome::WouldBlock(shared.read_deadline)
    }

    pub(crate) async fn read_stream(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.try_read(buf) {
                ReadOutcome::Read(n, update) => {
                    if let Some(credit) = update {
                        let frame = Frame::window_update(self.id, credit).right();
                        // session teardown races are fine, data was read
                        let _ = self.sender.send(StreamCommand::SendFrame(frame)).await;
                    }
                    return Ok(n);
                }
                ReadOutcome::Eof => return Ok(0),
                ReadOutcome::WouldBlock(deadline) => {
                    self.wait_readable(deadline).await?;
                }
            }
        }
    }

    pub(crate) async fn write_stream(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let body = loop {
            {
                let mut shared = self.shared();
                if shared.reset {
                    return Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset"));
                }
                if shared.session_closed {
                    return Err(self.write_zero_err());
                }
                if !shared.state().can_write() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "stream is closed for writing",
                    ));
                }
                if shared.credit > 0 {
                    let k = (shared.credit as usize)
                        .min(buf.len())
                        .min(self.config.max_message_size);
                    shared.credit -= k as u32;
                    break Vec::from(&buf[..k]);
                }
                trace!("{}/{}: no more credit, waiting", self.conn, self.id);
            }
            self.wait_writable().await?;
        };

        let n = body.len();
        let frame = Frame::data(self.id, body).left();
        self.sender
            .send(StreamCommand::SendFrame(frame))
            .await
            .map_err(|_| self.write_zero_err())?;
        trace!("{}/{}: wrote {} bytes", self.conn, self.id, n);
        Ok(n)
    }

    /// Fully closes the stream: half-closes our sending direction and
    /// leaves the rest to the remote. Once both sides signalled FIN (or
    /// a reset happened) the stream disappears from the session.
    ///
    /// Reads remain possible until the remote closes; callers done with
    /// the stream simply stop reading.
    pub async fn close(&mut self) -> io::Result<()> {
        self.close_stream().await
    }

    /// Half-close: sends FIN, after which writes fail and reads continue.
    pub(crate) async fn close_stream(&mut self) -> io::Result<()> {
        {
            let mut shared = self.shared();
            if shared.reset || shared.session_closed {
                return Ok(());
            }
            match shared.state() {
                State::SendClosed | State::Closed => return Ok(()),
                State::Open | State::RecvClosed => {}
            }
            shared.update_state(self.conn, self.id, State::SendClosed);
        }
        trace!("{}/{}: close (FIN)", self.conn, self.id);
        let _ = self.sender.send(StreamCommand::CloseStream(self.id)).await;
        Ok(())
    }

    /// Waits until the buffer is non-empty or the stream cannot deliver
    /// more data; honors the read deadline.
    async fn wait_readable(&self, deadline: Option<Instant>) -> io::Result<()> {
        let shared = self.shared.clone();
        let readable = future::poll_fn(move |cx| {
            let mut shared = shared.lock().unwrap_or_else(|e| e.into_inner());
            if !shared.buffer.is_empty()
                || shared.reset
                || shared.session_closed
                || !shared.state().can_read()
            {
                Poll::Ready(())
            } else {
                shared.reader = Some(cx.waker().clone());
                Poll::Pending
            }
        });

        match deadline {
            None => {
                readable.await;
                Ok(())
            }
            Some(deadline) => {
                let timeout = deadline
                    .checked_duration_since(Instant::now())
                    .ok_or_else(read_timed_out)?;
                futures::pin_mut!(readable);
                match future::select(readable, Delay::new(timeout)).await {
                    Either::Left(..) => Ok(()),
                    Either::Right(..) => Err(read_timed_out()),
                }
            }
        }
    }

    /// Waits for send credit; a stream blocked on the window for longer
    /// than the configured write timeout is reset.
    async fn wait_writable(&mut self) -> io::Result<()> {
        let shared = self.shared.clone();
        let writable = future::poll_fn(move |cx| {
            let mut shared = shared.lock().unwrap_or_else(|e| e.into_inner());
            if shared.credit > 0
                || shared.reset
                || shared.session_closed
                || !shared.state().can_write()
            {
                Poll::Ready(())
            } else {
                shared.writer = Some(cx.waker().clone());
                Poll::Pending
            }
        });

        let timeout = self.config.write_timeout;
        if timeout == Duration::ZERO {
            writable.await;
            return Ok(());
        }
        futures::pin_mut!(writable);
        match future::select(writable, Delay::new(timeout)).await {
            Either::Left(..) => Ok(()),
            Either::Right(..) => {
                trace!("{}/{}: write timed out, resetting", self.conn, self.id);
                self.shared().mark_reset();
                let _ = self.sender.send(StreamCommand::ResetStream(self.id)).await;
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
            }
        }
    }

    fn write_zero_err(&self) -> io::Error {
        let msg = format!("{}/{}: connection is closed", self.conn, self.id);
        io::Error::new(io::ErrorKind::WriteZero, msg)
    }
}

fn read_timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "read deadline expired")
}

#[async_trait::async_trait]
impl strand_traits::ReadEx for Stream {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_stream(buf).await
    }
}

#[async_trait::async_trait]
impl strand_traits::WriteEx for Stream {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_stream(buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close2(&mut self) -> io::Result<()> {
        self.close_stream().await
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: State,
    /// Terminated by RST from either side.
    pub(crate) reset: bool,
    /// The session carrying this stream is gone.
    pub(crate) session_closed: bool,
    /// Receive credit currently advertised to the remote.
    pub(crate) window: u32,
    /// Send credit granted by the remote.
    pub(crate) credit: u32,
    pub(crate) buffer: Chunks,
    pub(crate) reader: Option<Waker>,
    pub(crate) writer: Option<Waker>,
    pub(crate) read_deadline: Option<Instant>,
    pub(crate) protocol: Option<String>,
}

impl Shared {
    fn new(window: u32, credit: u32) -> Self {
        Shared {
            state: State::Open,
            reset: false,
            session_closed: false,
            window,
            credit,
            buffer: Chunks::new(),
            reader: None,
            writer: None,
            read_deadline: None,
            protocol: None,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// Updates the stream state and returns the state before the update.
    pub(crate) fn update_state(
        &mut self,
        cid: connection::Id,
        sid: StreamId,
        next: State,
    ) -> State {
        use self::State::*;

        let current = self.state;

        match (current, next) {
            (Closed, _) => {}
            (Open, _) => self.state = next,
            (RecvClosed, Closed) => self.state = Closed,
            (RecvClosed, Open) => {}
            (RecvClosed, RecvClosed) => {}
            (RecvClosed, SendClosed) => self.state = Closed,
            (SendClosed, Closed) => self.state = Closed,
            (SendClosed, Open) => {}
            (SendClosed, RecvClosed) => self.state = Closed,
            (SendClosed, SendClosed) => {}
        }

        trace!("{}/{}: update state: ({:?} {:?} {:?})", cid, sid, current, next, self.state);

        current
    }

    /// Puts the stream into its reset terminal state and wakes both
    /// directions; unread data is discarded.
    pub(crate) fn mark_reset(&mut self) {
        self.reset = true;
        self.state = State::Closed;
        self.buffer.clear();
        self.wake_reader();
        self.wake_writer();
    }

    /// Marks the session as gone: reads drain the buffer then EOF,
    /// writes fail.
    pub(crate) fn mark_session_closed(&mut self) {
        self.session_closed = true;
        self.wake_reader();
        self.wake_writer();
    }

    pub(crate) fn wake_reader(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
    }

    pub(crate) fn wake_writer(&mut self) {
        if let Some(waker) = self.writer.take() {
            waker.wake();
        }
    }

    /// After a read consumed buffered bytes, decides whether enough of
    /// the window is unadvertised to be worth replenishing. Updates are
    /// batched: nothing is sent until at least half the window is free.
    pub(crate) fn prepare_window_update(&mut self, config: &Config) -> Option<u32> {
        if self.reset || self.session_closed || !self.state.can_read() {
            return None;
        }
        let max = config.receive_window;
        let buffered = self.buffer.len() as u32;
        let delta = max.saturating_sub(buffered).saturating_sub(self.window);
        if delta < max / 2 {
            return None;
        }
        self.window += delta;
        Some(delta)
    }
}
