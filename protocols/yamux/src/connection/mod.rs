//! The yamux session.
//!
//! Task layout per connection:
//!
//! - a *reader task* owning the read half of the pipe, decoding frames
//!   and forwarding them to the event loop;
//! - a *writer task* owning the write half, the sole writer to the pipe,
//!   draining a queue of outgoing frames;
//! - the *event loop* ([`Connection::run`]) owning all session state:
//!   the stream map, accept queue, pings, go-away and timers. Stream
//!   handles and the [`Control`] talk to it over bounded channels.
//!
//! The event loop never blocks on application code: incoming data is
//! appended to per-stream buffers and the relevant waiters are woken.

pub mod control;
pub mod stream;

use crate::error::ConnectionError;
use crate::frame::header::{self, Data, StreamId, Tag, WindowUpdate, ACK, FIN, RST, SYN};
use crate::frame::io::{FrameDecodeError, FrameReader, FrameWriter};
use crate::frame::Frame;
use crate::Config;
use async_std::task;
use futures::channel::{mpsc, oneshot};
use futures::future::Either;
use futures::prelude::*;
use futures_timer::Delay;
use log::{debug, info, trace};
use strand_traits::SplittableReadWrite;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::fmt;

pub use control::Control;
pub use stream::{State, Stream};

/// How often the event loop checks its deadlines (SYN timeouts, the
/// shutdown drain deadline).
const SWEEP_INTERVAL: Duration = Duration::from_millis(300);

const CHANNEL_CAPACITY: usize = 32;

/// The role of this endpoint; decides the parity of locally allocated
/// stream ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Allocates odd stream ids.
    Client,
    /// Allocates even stream ids.
    Server,
}

/// Identifier of a connection, for logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Id(u32);

impl Id {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        Id(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Commands from stream handles to the event loop.
#[derive(Debug)]
pub(crate) enum StreamCommand {
    /// Put a frame on the wire.
    SendFrame(Frame<Either<Data, WindowUpdate>>),
    /// Half-close the stream (FIN).
    CloseStream(StreamId),
    /// Abruptly terminate the stream (RST).
    ResetStream(StreamId),
}

/// Commands from [`Control`] handles to the event loop.
pub(crate) enum ControlCommand {
    OpenStream(oneshot::Sender<Result<Stream, ConnectionError>>),
    AcceptStream(oneshot::Sender<Result<Stream, ConnectionError>>),
    Ping(oneshot::Sender<Result<Duration, ConnectionError>>),
    CloseConnection(oneshot::Sender<()>),
}

/// What the socket-facing tasks report to the event loop.
enum DataOutcome {
    Accepted,
    Dropped,
    FatalProtocol(&'static str),
}

enum SocketEvent {
    Frame(Frame<()>),
    ReadFailed(FrameDecodeError),
    Eof,
    WriteFailed(std::io::Error),
}

enum WriterCommand {
    Frame(Frame<()>),
    Close,
}

enum Shutdown {
    NotStarted,
    Draining {
        deadline: Instant,
        notifiers: Vec<oneshot::Sender<()>>,
    },
    Complete,
}

/// One event-loop turn's worth of input.
enum Event {
    Socket(Option<SocketEvent>),
    StreamCmd(Option<StreamCommand>),
    ControlCmd(Option<ControlCommand>),
    KeepAlive,
    Sweep,
}

/// A yamux session over a spliced byte pipe.
pub struct Connection {
    id: Id,
    mode: Mode,
    config: Arc<Config>,
    events: mpsc::Receiver<SocketEvent>,
    writer_tx: mpsc::Sender<WriterCommand>,
    stream_tx: mpsc::Sender<StreamCommand>,
    stream_rx: mpsc::Receiver<StreamCommand>,
    control_tx: mpsc::Sender<ControlCommand>,
    control_rx: mpsc::Receiver<ControlCommand>,
    streams: HashMap<u32, Stream>,
    accept_backlog: VecDeque<Stream>,
    pending_accepts: VecDeque<oneshot::Sender<Result<Stream, ConnectionError>>>,
    pending_pings: HashMap<u32, (Instant, oneshot::Sender<Result<Duration, ConnectionError>>)>,
    next_ping_id: u32,
    next_stream_id: u32,
    last_inbound_id: u32,
    pending_syn: HashMap<u32, Instant>,
    local_goaway: bool,
    remote_goaway: bool,
    shutdown: Shutdown,
    keepalive: Option<Delay>,
    keepalive_outstanding: Option<u32>,
    sweep: Delay,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("streams", &self.streams.len())
            .finish()
    }
}

impl Connection {
    /// Creates a new session over `socket`, immediately spawning its
    /// reader and writer tasks. The event loop itself runs inside
    /// [`Connection::run`], which the caller drives or spawns.
    pub fn new<C: SplittableReadWrite>(socket: C, config: Config, mode: Mode) -> Self {
        let id = Id::fresh();
        let config = Arc::new(config);
        debug!("{}: new connection ({:?})", id, mode);

        let (reader_half, writer_half) = socket.split2();
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (writer_tx, writer_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stream_tx, stream_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let max_body_len = config.receive_window as usize;
        let mut reader = FrameReader::new(id, reader_half, max_body_len);
        let mut reader_events = event_tx.clone();
        task::spawn(async move {
            loop {
                match reader.recv_frame().await {
                    Ok(Some(frame)) => {
                        if reader_events.send(SocketEvent::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = reader_events.send(SocketEvent::Eof).await;
                        break;
                    }
                    Err(e) => {
                        let _ = reader_events.send(SocketEvent::ReadFailed(e)).await;
                        break;
                    }
                }
            }
            trace!("{}: reader task exiting", id);
        });

        let mut writer = FrameWriter::new(id, writer_half);
        let mut writer_events = event_tx;
        let mut writer_rx: mpsc::Receiver<WriterCommand> = writer_rx;
        task::spawn(async move {
            while let Some(cmd) = writer_rx.next().await {
                match cmd {
                    WriterCommand::Frame(frame) => {
                        if let Err(e) = writer.send_frame(&frame).await {
                            let _ = writer_events.send(SocketEvent::WriteFailed(e)).await;
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        let _ = writer.close().await;
                        break;
                    }
                }
            }
            trace!("{}: writer task exiting", id);
        });

        let keepalive = if config.keep_alive_interval > Duration::ZERO {
            Some(Delay::new(config.keep_alive_interval))
        } else {
            None
        };

        Connection {
            id,
            mode,
            config,
            events: event_rx,
            writer_tx,
            stream_tx,
            stream_rx,
            control_tx,
            control_rx,
            streams: HashMap::new(),
            accept_backlog: VecDeque::new(),
            pending_accepts: VecDeque::new(),
            pending_pings: HashMap::new(),
            next_ping_id: 0,
            next_stream_id: match mode {
                Mode::Client => 1,
                Mode::Server => 2,
            },
            last_inbound_id: 0,
            pending_syn: HashMap::new(),
            local_goaway: false,
            remote_goaway: false,
            shutdown: Shutdown::NotStarted,
            keepalive,
            keepalive_outstanding: None,
            sweep: Delay::new(SWEEP_INTERVAL),
        }
    }

    /// This connection's identifier, for logging.
    pub fn id(&self) -> Id {
        self.id
    }

    /// A handle for opening and accepting streams on this session.
    pub fn control(&self) -> Control {
        Control::new(self.control_tx.clone())
    }

    /// Drives the session until it terminates. Must be polled for the
    /// session to make any progress; typically spawned as a task.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        let result = self.event_loop().await;
        match &result {
            Ok(()) => info!("{}: connection closed", self.id),
            Err(e) => debug!("{}: connection terminated: {}", self.id, e),
        }
        self.terminate();
        result
    }

    async fn event_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if matches!(self.shutdown, Shutdown::Complete) {
                return Ok(());
            }

            let event = {
                let mut keepalive = match self.keepalive.as_mut() {
                    Some(delay) => Either::Left(delay),
                    None => Either::Right(futures::future::pending::<()>()),
                }
                .fuse();
                let mut sweep = (&mut self.sweep).fuse();

                futures::select! {
                    ev = self.events.next() => Event::Socket(ev),
                    cmd = self.stream_rx.next() => Event::StreamCmd(cmd),
                    cmd = self.control_rx.next() => Event::ControlCmd(cmd),
                    _ = keepalive => Event::KeepAlive,
                    _ = sweep => Event::Sweep,
                }
            };

            match event {
                Event::Socket(Some(SocketEvent::Frame(frame))) => self.on_frame(frame).await?,
                Event::Socket(Some(SocketEvent::Eof)) | Event::Socket(None) => {
                    // EOF is orderly only once a go-away was exchanged
                    if self.remote_goaway || !matches!(self.shutdown, Shutdown::NotStarted) {
                        return Ok(());
                    }
                    return Err(ConnectionError::Closed);
                }
                Event::Socket(Some(SocketEvent::ReadFailed(e))) => {
                    if !matches!(e, FrameDecodeError::Io(_)) {
                        // the remote broke the framing; tell it before dying
                        let _ = self
                            .writer_tx
                            .send(WriterCommand::Frame(Frame::protocol_error().cast()))
                            .await;
                    }
                    return Err(e.into());
                }
                Event::Socket(Some(SocketEvent::WriteFailed(e))) => return Err(e.into()),
                Event::StreamCmd(Some(cmd)) => self.on_stream_command(cmd).await?,
                Event::StreamCmd(None) => {}
                Event::ControlCmd(Some(cmd)) => self.on_control_command(cmd).await?,
                Event::ControlCmd(None) => {}
                Event::KeepAlive => self.on_keepalive().await?,
                Event::Sweep => self.on_sweep().await?,
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame<()>) -> Result<(), ConnectionError> {
        match frame.header().tag() {
            Tag::Data => self.on_data(frame.cast()).await,
            Tag::WindowUpdate => self.on_window_update(frame.cast()).await,
            Tag::Ping => self.on_ping(frame.cast()).await,
            Tag::GoAway => self.on_go_away(frame.cast()).await,
        }
    }

    async fn on_data(&mut self, frame: Frame<Data>) -> Result<(), ConnectionError> {
        let id = frame.header().stream_id();
        let flags = frame.header().flags();

        if id.is_session() {
            return self.fatal_protocol("data frame on the session id").await;
        }

        self.pending_syn.remove(&id.val());

        if flags.contains(RST) {
            if let Some(stream) = self.streams.remove(&id.val()) {
                debug!("{}/{}: remote reset", self.id, id);
                stream.shared().mark_reset();
            }
            return self.maybe_finish_shutdown().await;
        }

        if flags.contains(SYN) {
            self.on_inbound_syn(id, 0).await?;
        }
        if flags.contains(ACK) {
            trace!("{}/{}: acknowledged by remote", self.id, id);
        }

        if !frame.body().is_empty() {
            let len = frame.body().len() as u32;
            if let Some(stream) = self.streams.get(&id.val()) {
                let stream = stream.clone();
                let outcome = {
                    let mut shared = stream.shared();
                    if shared.reset {
                        // the local side already reset this stream; drop data
                        DataOutcome::Dropped
                    } else if !shared.state().can_read() {
                        DataOutcome::FatalProtocol("data after FIN")
                    } else if len > shared.window {
                        DataOutcome::FatalProtocol("receive window exceeded")
                    } else {
                        shared.window -= len;
                        shared.buffer.push(frame.into_body());
                        shared.wake_reader();
                        DataOutcome::Accepted
                    }
                };
                if let DataOutcome::FatalProtocol(msg) = outcome {
                    return self.fatal_protocol(msg).await;
                }
            } else if !flags.contains(SYN) {
                // data for a stream we no longer know: answer with RST
                trace!("{}/{}: data for unknown stream", self.id, id);
                self.enqueue(Frame::reset_stream(id)).await?;
            }
        }

        if flags.contains(FIN) {
            if let Some(stream) = self.streams.get(&id.val()) {
                let stream = stream.clone();
                let state = {
                    let mut shared = stream.shared();
                    shared.update_state(self.id, id, State::RecvClosed);
                    shared.wake_reader();
                    shared.state()
                };
                if state == State::Closed {
                    self.streams.remove(&id.val());
                    self.maybe_finish_shutdown().await?;
                }
            }
        }
        Ok(())
    }

    async fn on_window_update(&mut self, frame: Frame<WindowUpdate>) -> Result<(), ConnectionError> {
        let id = frame.header().stream_id();
        let flags = frame.header().flags();
        let credit = frame.header().len().val();

        if id.is_session() {
            return Ok(());
        }

        self.pending_syn.remove(&id.val());

        if flags.contains(RST) {
            if let Some(stream) = self.streams.remove(&id.val()) {
                debug!("{}/{}: remote reset", self.id, id);
                stream.shared().mark_reset();
            }
            return self.maybe_finish_shutdown().await;
        }

        if flags.contains(SYN) {
            // a stream may open through a window update carrying its
            // first credit grant
            return self.on_inbound_syn(id, credit).await;
        }

        if let Some(stream) = self.streams.get(&id.val()) {
            let mut shared = stream.shared();
            shared.credit = shared.credit.saturating_add(credit);
            trace!("{}/{}: send credit now {}", self.id, id, shared.credit);
            shared.wake_writer();
        }
        // window updates for unknown streams are ignored
        Ok(())
    }

    async fn on_ping(&mut self, frame: Frame<header::Ping>) -> Result<(), ConnectionError> {
        let flags = frame.header().flags();
        let opaque = frame.header().len().val();

        if flags.contains(SYN) {
            trace!("{}: ping {} from remote", self.id, opaque);
            let mut pong = Frame::ping(opaque);
            pong.header_mut().ack();
            return self.enqueue(pong).await;
        }
        if flags.contains(ACK) {
            if let Some((sent_at, tx)) = self.pending_pings.remove(&opaque) {
                let _ = tx.send(Ok(sent_at.elapsed()));
            }
            if self.keepalive_outstanding == Some(opaque) {
                self.keepalive_outstanding = None;
            }
        }
        Ok(())
    }

    async fn on_go_away(&mut self, frame: Frame<header::GoAway>) -> Result<(), ConnectionError> {
        let code = frame.header().len().val();
        info!("{}: remote go away (code {})", self.id, code);
        self.remote_goaway = true;
        if code != header::CODE_TERM {
            return Err(ConnectionError::GoAwayReceived(code));
        }
        if matches!(self.shutdown, Shutdown::NotStarted) {
            // let existing streams drain, then close
            self.shutdown = Shutdown::Draining {
                deadline: Instant::now() + self.config.shutdown_timeout,
                notifiers: Vec::new(),
            };
        }
        self.maybe_finish_shutdown().await
    }

    async fn on_inbound_syn(&mut self, id: StreamId, extra_credit: u32) -> Result<(), ConnectionError> {
        let valid_parity = match self.mode {
            Mode::Client => id.val() % 2 == 0,
            Mode::Server => id.val() % 2 == 1,
        };
        if !valid_parity || id.val() == 0 {
            return self.fatal_protocol("invalid inbound stream id parity").await;
        }
        if id.val() <= self.last_inbound_id {
            return self.fatal_protocol("inbound stream id not monotonic").await;
        }
        self.last_inbound_id = id.val();

        if self.local_goaway || !matches!(self.shutdown, Shutdown::NotStarted) {
            debug!("{}/{}: refusing stream, shutting down", self.id, id);
            return self.enqueue(Frame::reset_stream(id)).await;
        }
        if self.streams.len() >= self.config.max_num_streams {
            debug!("{}/{}: refusing stream, at capacity", self.id, id);
            return self.enqueue(Frame::reset_stream(id)).await;
        }

        trace!("{}/{}: new inbound stream", self.id, id);
        let stream = self.make_stream(id, self.config.initial_window + extra_credit);
        self.streams.insert(id.val(), stream.clone());

        let mut ack = Frame::data(id, Vec::new());
        ack.header_mut().ack();
        self.enqueue(ack).await?;
        if self.config.receive_window > self.config.initial_window {
            let delta = self.config.receive_window - self.config.initial_window;
            self.enqueue(Frame::window_update(id, delta)).await?;
        }

        if let Some(tx) = self.pending_accepts.pop_front() {
            let _ = tx.send(Ok(stream));
        } else {
            self.accept_backlog.push_back(stream);
        }
        Ok(())
    }

    async fn on_stream_command(&mut self, cmd: StreamCommand) -> Result<(), ConnectionError> {
        match cmd {
            StreamCommand::SendFrame(frame) => self.enqueue(frame).await,
            StreamCommand::CloseStream(id) => {
                if self.streams.contains_key(&id.val()) {
                    self.enqueue(Frame::close_stream(id)).await?;
                    let closed = self
                        .streams
                        .get(&id.val())
                        .map(|s| s.shared().state() == State::Closed)
                        .unwrap_or(false);
                    if closed {
                        self.streams.remove(&id.val());
                        self.maybe_finish_shutdown().await?;
                    }
                }
                Ok(())
            }
            StreamCommand::ResetStream(id) => {
                if self.streams.remove(&id.val()).is_some() {
                    self.enqueue(Frame::reset_stream(id)).await?;
                    self.maybe_finish_shutdown().await?;
                }
                Ok(())
            }
        }
    }

    async fn on_control_command(&mut self, cmd: ControlCommand) -> Result<(), ConnectionError> {
        match cmd {
            ControlCommand::OpenStream(tx) => {
                if self.local_goaway || self.remote_goaway || !matches!(self.shutdown, Shutdown::NotStarted) {
                    let _ = tx.send(Err(ConnectionError::Closed));
                    return Ok(());
                }
                if self.streams.len() >= self.config.max_num_streams {
                    let _ = tx.send(Err(ConnectionError::TooManyStreams));
                    return Ok(());
                }
                let id = self.next_stream_id;
                match id.checked_add(2) {
                    Some(next) => self.next_stream_id = next,
                    None => {
                        let _ = tx.send(Err(ConnectionError::NoMoreStreamIds));
                        return Ok(());
                    }
                }

                let stream_id = StreamId::new(id);
                let stream = self.make_stream(stream_id, self.config.initial_window);
                self.streams.insert(id, stream.clone());

                let mut syn = Frame::data(stream_id, Vec::new());
                syn.header_mut().syn();
                self.enqueue(syn).await?;
                if self.config.receive_window > self.config.initial_window {
                    let delta = self.config.receive_window - self.config.initial_window;
                    self.enqueue(Frame::window_update(stream_id, delta)).await?;
                }
                self.pending_syn
                    .insert(id, Instant::now() + self.config.syn_timeout);

                trace!("{}/{}: new outbound stream", self.id, stream_id);
                let _ = tx.send(Ok(stream));
                Ok(())
            }
            ControlCommand::AcceptStream(tx) => {
                if let Some(stream) = self.accept_backlog.pop_front() {
                    let _ = tx.send(Ok(stream));
                } else if !matches!(self.shutdown, Shutdown::NotStarted) {
                    let _ = tx.send(Err(ConnectionError::Closed));
                } else {
                    self.pending_accepts.push_back(tx);
                }
                Ok(())
            }
            ControlCommand::Ping(tx) => {
                let opaque = self.fresh_ping_id();
                let mut ping = Frame::ping(opaque);
                ping.header_mut().syn();
                self.enqueue(ping).await?;
                self.pending_pings.insert(opaque, (Instant::now(), tx));
                Ok(())
            }
            ControlCommand::CloseConnection(tx) => {
                if matches!(self.shutdown, Shutdown::Complete) {
                    let _ = tx.send(());
                    return Ok(());
                }
                if let Shutdown::Draining { notifiers, .. } = &mut self.shutdown {
                    notifiers.push(tx);
                    return Ok(());
                }

                debug!("{}: close initiated", self.id);
                self.local_goaway = true;
                self.enqueue(Frame::term()).await?;
                for waiter in self.pending_accepts.drain(..) {
                    let _ = waiter.send(Err(ConnectionError::Closed));
                }
                // streams never handed to the application are reset
                let backlog: Vec<Stream> = self.accept_backlog.drain(..).collect();
                for stream in backlog {
                    stream.shared().mark_reset();
                    self.streams.remove(&stream.id().val());
                    self.enqueue(Frame::reset_stream(stream.id())).await?;
                }
                self.shutdown = Shutdown::Draining {
                    deadline: Instant::now() + self.config.shutdown_timeout,
                    notifiers: vec![tx],
                };
                self.maybe_finish_shutdown().await?;
                Ok(())
            }
        }
    }

    async fn on_keepalive(&mut self) -> Result<(), ConnectionError> {
        if self.keepalive_outstanding.is_some() {
            debug!("{}: keep-alive ping went unanswered", self.id);
            return Err(ConnectionError::KeepAliveTimeout);
        }
        let opaque = self.fresh_ping_id();
        let mut ping = Frame::ping(opaque);
        ping.header_mut().syn();
        self.enqueue(ping).await?;
        self.keepalive_outstanding = Some(opaque);
        if let Some(delay) = self.keepalive.as_mut() {
            delay.reset(self.config.keep_alive_interval);
        }
        Ok(())
    }

    async fn on_sweep(&mut self) -> Result<(), ConnectionError> {
        self.sweep.reset(SWEEP_INTERVAL);
        let now = Instant::now();

        let expired: Vec<u32> = self
            .pending_syn
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.pending_syn.remove(&id);
            if let Some(stream) = self.streams.remove(&id) {
                debug!("{}/{}: no response to SYN, resetting", self.id, id);
                stream.shared().mark_reset();
                self.enqueue(Frame::reset_stream(StreamId::new(id))).await?;
            }
        }

        let drain_expired = matches!(
            &self.shutdown,
            Shutdown::Draining { deadline, .. } if now >= *deadline
        );
        if drain_expired {
            debug!("{}: shutdown timeout, resetting remaining streams", self.id);
            let remaining: Vec<u32> = self.streams.keys().copied().collect();
            for id in remaining {
                if let Some(stream) = self.streams.remove(&id) {
                    stream.shared().mark_reset();
                    self.enqueue(Frame::reset_stream(StreamId::new(id))).await?;
                }
            }
            self.accept_backlog.clear();
            self.finish_shutdown().await?;
        }

        self.maybe_finish_shutdown().await
    }

    async fn maybe_finish_shutdown(&mut self) -> Result<(), ConnectionError> {
        let done = matches!(&self.shutdown, Shutdown::Draining { .. })
            && self.streams.is_empty()
            && self.accept_backlog.is_empty();
        if done {
            self.finish_shutdown().await?;
        }
        Ok(())
    }

    async fn finish_shutdown(&mut self) -> Result<(), ConnectionError> {
        if !self.local_goaway {
            self.local_goaway = true;
            self.enqueue(Frame::term()).await?;
        }
        let _ = self.writer_tx.send(WriterCommand::Close).await;
        if let Shutdown::Draining { notifiers, .. } =
            std::mem::replace(&mut self.shutdown, Shutdown::Complete)
        {
            for tx in notifiers {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    async fn fatal_protocol(&mut self, msg: &'static str) -> Result<(), ConnectionError> {
        debug!("{}: protocol violation: {}", self.id, msg);
        let _ = self
            .writer_tx
            .send(WriterCommand::Frame(Frame::protocol_error().cast()))
            .await;
        Err(ConnectionError::ProtocolViolation(msg))
    }

    async fn enqueue<T>(&mut self, frame: Frame<T>) -> Result<(), ConnectionError> {
        self.writer_tx
            .send(WriterCommand::Frame(frame.cast()))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    fn make_stream(&self, id: StreamId, credit: u32) -> Stream {
        Stream::new(
            id,
            self.id,
            self.config.clone(),
            self.config.receive_window,
            credit,
            self.stream_tx.clone(),
        )
    }

    fn fresh_ping_id(&mut self) -> u32 {
        let id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(1);
        id
    }

    /// Fans the session's end out to every waiter: streams drain their
    /// buffers and then report EOF, writes and pending operations fail.
    fn terminate(&mut self) {
        for (_, stream) in self.streams.drain() {
            stream.shared().mark_session_closed();
        }
        self.accept_backlog.clear();
        self.pending_syn.clear();
        for waiter in self.pending_accepts.drain(..) {
            let _ = waiter.send(Err(ConnectionError::Closed));
        }
        for (_, (_, tx)) in self.pending_pings.drain() {
            let _ = tx.send(Err(ConnectionError::Closed));
        }

        self.control_rx.close();
        while let Ok(Some(cmd)) = self.control_rx.try_next() {
            match cmd {
                ControlCommand::OpenStream(tx) => {
                    let _ = tx.send(Err(ConnectionError::Closed));
                }
                ControlCommand::AcceptStream(tx) => {
                    let _ = tx.send(Err(ConnectionError::Closed));
                }
                ControlCommand::Ping(tx) => {
                    let _ = tx.send(Err(ConnectionError::Closed));
                }
                ControlCommand::CloseConnection(tx) => {
                    let _ = tx.send(());
                }
            }
        }
        self.stream_rx.close();
        while let Ok(Some(_)) = self.stream_rx.try_next() {}

        let _ = self.writer_tx.try_send(WriterCommand::Close);
        if let Shutdown::Draining { notifiers, .. } =
            std::mem::replace(&mut self.shutdown, Shutdown::Complete)
        {
            for tx in notifiers {
                let _ = tx.send(());
            }
        }
    }
}
