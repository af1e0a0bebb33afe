use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{
    self, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::config::{Config, Limits};
use crate::encode::{self, Arg};
use crate::error::ProtocolError;
use crate::frame::FrameType;
use crate::reply::Reply;
use crate::wire;
use crate::{Error, Result};

/// A RESP connection over one duplex byte stream, with support for pipelining.
///
/// Commands are written with [`send`](Connection::send), pushed onto the wire with
/// [`flush`](Connection::flush) and their replies collected, in order, with
/// [`receive`](Connection::receive). [`do_command`](Connection::do_command) does all three for
/// one command, after draining anything already pipelined.
///
/// Every method takes `&self`, so a connection can be shared behind an `Arc`. Writes from several
/// tasks are safe. Reading is not: replies are matched to commands purely by order, so only one
/// task should receive from a connection at a time.
///
/// The first transport or protocol error is fatal. It closes the stream and is returned from
/// every later call, without touching the stream again.
pub struct Connection<S = TcpStream> {
    id: Uuid,
    addr: Option<String>,
    state: Mutex<State>,
    // Cancelled once the connection is closed or failed, to wake up in-flight I/O.
    closed: CancellationToken,
    reader: AsyncMutex<ReadHalfState<S>>,
    writer: AsyncMutex<WriteHalfState<S>>,
    read_timeout: Duration,
    write_timeout: Duration,
    limits: Limits,
}

struct State {
    // Commands sent whose replies haven't been received yet.
    pending: usize,
    status: Status,
}

enum Status {
    Open,
    Closed(Error),
}

struct ReadHalfState<S> {
    stream: Option<BufReader<ReadHalf<S>>>,
    // Scratch space for header lines.
    line: Vec<u8>,
}

struct WriteHalfState<S> {
    stream: Option<BufWriter<WriteHalf<S>>>,
    // Scratch space for serializing commands.
    buf: BytesMut,
}

/// What [`Connection::do_command`] got back.
#[derive(Debug)]
pub struct Outcome {
    /// The reply to the last command.
    pub reply: Reply,
    /// The first error reply among all the commands that were read, if any.
    pub error: Option<Error>,
}

impl Outcome {
    /// The first error if there was one, the last reply otherwise.
    pub fn into_result(self) -> Result<Reply> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.reply),
        }
    }
}

impl Connection<TcpStream> {
    /// Connects to a server with the default [`Config`].
    pub async fn dial(addr: impl ToSocketAddrs + fmt::Display) -> Result<Self> {
        Self::dial_with_config(addr, Config::default()).await
    }

    #[instrument(skip_all, fields(addr = %addr))]
    pub async fn dial_with_config(
        addr: impl ToSocketAddrs + fmt::Display,
        config: Config,
    ) -> Result<Self> {
        let addr_str = addr.to_string();
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let mut conn = Connection::with_config(stream, config);
        conn.addr = Some(addr_str);
        debug!(connection_id = %conn.id, "connected");

        Ok(conn)
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        Self::with_config(stream, Config::default())
    }

    pub fn with_config(stream: S, config: Config) -> Self {
        let (read_half, write_half) = io::split(stream);

        Connection {
            id: Uuid::new_v4(),
            addr: None,
            state: Mutex::new(State {
                pending: 0,
                status: Status::Open,
            }),
            closed: CancellationToken::new(),
            reader: AsyncMutex::new(ReadHalfState {
                stream: Some(BufReader::with_capacity(
                    config.read_buffer_capacity,
                    read_half,
                )),
                line: Vec::new(),
            }),
            writer: AsyncMutex::new(WriteHalfState {
                stream: Some(BufWriter::with_capacity(
                    config.write_buffer_capacity,
                    write_half,
                )),
                buf: BytesMut::with_capacity(config.write_buffer_capacity),
            }),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            limits: config.limits,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The address this connection was dialed to, if it was dialed.
    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Number of commands sent whose replies haven't been received yet.
    pub fn pending(&self) -> usize {
        self.state().pending
    }

    /// The error that closed this connection, if it is closed.
    pub fn err(&self) -> Option<Error> {
        match &self.state().status {
            Status::Open => None,
            Status::Closed(err) => Some(err.clone()),
        }
    }

    /// Closes the connection, dropping any output that hasn't been flushed.
    ///
    /// Only the first call touches the stream. Later calls, and calls on a connection that
    /// already failed, return the error it was closed with.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state();
            if let Status::Closed(err) = &state.status {
                return Err(err.clone());
            }
            state.status = Status::Closed(Error::Closed);
        }
        self.closed.cancel();
        debug!(connection_id = %self.id, "closing connection");

        self.reader.lock().await.stream = None;

        let stream = self.writer.lock().await.stream.take();
        match stream {
            Some(stream) => {
                let mut stream = stream.into_inner();
                let shutdown = async { stream.shutdown().await.map_err(Error::from) };
                with_deadline(self.write_timeout, shutdown).await
            }
            None => Ok(()),
        }
    }

    /// Queues a command in the write buffer. Nothing reaches the server until the buffer fills
    /// up or is [flushed](Connection::flush).
    pub async fn send(&self, cmd: &str, args: &[Arg]) -> Result<()> {
        self.state().pending += 1;
        trace!(connection_id = %self.id, cmd, args = args.len(), "send");

        let mut writer = self.writer.lock().await;
        let result = {
            let WriteHalfState { stream, buf } = &mut *writer;
            let stream = self.live(stream)?;
            self.guard(self.write_timeout, write_command(stream, buf, cmd, args))
                .await
        };
        result.map_err(|e| self.fail(&mut writer.stream, e))
    }

    /// Writes out everything queued by [`send`](Connection::send).
    pub async fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let result = {
            let stream = self.live(&mut writer.stream)?;
            self.guard(self.write_timeout, async { stream.flush().await.map_err(Error::from) })
                .await
        };
        result.map_err(|e| self.fail(&mut writer.stream, e))
    }

    /// Reads the reply to the oldest pending command.
    ///
    /// An error reply from the server is returned as `Err(Error::Server)`; unlike transport and
    /// protocol errors it doesn't affect the connection.
    pub async fn receive(&self) -> Result<Reply> {
        let mut reader = self.reader.lock().await;
        let result = {
            let ReadHalfState { stream, line } = &mut *reader;
            let stream = self.live(stream)?;
            self.guard(self.read_timeout, read_reply(stream, line, &self.limits))
                .await
        };
        let reply = result.map_err(|e| self.fail(&mut reader.stream, e))?;
        drop(reader);

        {
            let mut state = self.state();
            state.pending = state.pending.saturating_sub(1);
        }

        reply.into_result()
    }

    /// Sends one command and waits for its reply, after first collecting the replies of every
    /// command still pending.
    ///
    /// The outcome holds the reply to `cmd` and the first error reply seen among all of them. A
    /// transport or protocol error is returned as `Err` instead.
    #[instrument(skip(self, args), fields(connection_id = %self.id))]
    pub async fn do_command(&self, cmd: &str, args: &[Arg]) -> Result<Outcome> {
        let pending = self.take_pending();

        self.write_and_flush(Some((cmd, args))).await?;

        let mut reader = self.reader.lock().await;
        let result = {
            let ReadHalfState { stream, line } = &mut *reader;
            let stream = self.live(stream)?;
            let limits = &self.limits;
            self.guard(self.read_timeout, async move {
                let mut error = None;
                let mut last = Reply::Nil;
                for _ in 0..=pending {
                    let reply = read_reply(&mut *stream, &mut *line, limits).await?;
                    if let Reply::Error(msg) = &reply {
                        error.get_or_insert_with(|| Error::Server(msg.clone()));
                    }
                    last = reply;
                }
                Ok::<_, Error>(Outcome { reply: last, error })
            })
            .await
        };
        let outcome = result.map_err(|e| self.fail(&mut reader.stream, e))?;

        debug!(pending, failed = outcome.error.is_some(), "done");
        Ok(outcome)
    }

    /// Flushes and collects the replies to every pending command, error replies included.
    ///
    /// Returns `Reply::Nil` without any I/O when nothing is pending on a healthy connection.
    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn do_pending(&self) -> Result<Reply> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let pending = self.take_pending();
        if pending == 0 {
            return Ok(Reply::Nil);
        }

        self.write_and_flush(None).await?;

        let mut reader = self.reader.lock().await;
        let result = {
            let ReadHalfState { stream, line } = &mut *reader;
            let stream = self.live(stream)?;
            let limits = &self.limits;
            self.guard(self.read_timeout, async move {
                let mut replies = Vec::with_capacity(pending);
                for _ in 0..pending {
                    replies.push(read_reply(&mut *stream, &mut *line, limits).await?);
                }
                Ok::<_, Error>(Reply::Array(replies))
            })
            .await
        };
        result.map_err(|e| self.fail(&mut reader.stream, e))
    }

    /// Writes a `+<status>\r\n` line and flushes it.
    pub async fn send_status(&self, status: &str) -> Result<()> {
        self.send_line(FrameType::Status, status).await
    }

    /// Writes a `-<message>\r\n` line and flushes it.
    pub async fn send_error(&self, message: &str) -> Result<()> {
        self.send_line(FrameType::Error, message).await
    }

    async fn send_line(&self, frame_type: FrameType, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let result = {
            let WriteHalfState { stream, buf } = &mut *writer;
            let stream = self.live(stream)?;
            self.guard(self.write_timeout, async move {
                buf.clear();
                wire::put_line(buf, frame_type.prefix(), text.as_bytes());
                stream.write_all(buf).await?;
                stream.flush().await?;
                Ok::<_, Error>(())
            })
            .await
        };
        result.map_err(|e| self.fail(&mut writer.stream, e))
    }

    // Writes an optional command and flushes, all under one write deadline.
    async fn write_and_flush(&self, command: Option<(&str, &[Arg])>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let result = {
            let WriteHalfState { stream, buf } = &mut *writer;
            let stream = self.live(stream)?;
            self.guard(self.write_timeout, async move {
                if let Some((cmd, args)) = command {
                    write_command(&mut *stream, buf, cmd, args).await?;
                }
                stream.flush().await?;
                Ok::<_, Error>(())
            })
            .await
        };
        result.map_err(|e| self.fail(&mut writer.stream, e))
    }

    fn take_pending(&self) -> usize {
        std::mem::take(&mut self.state().pending)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Hands out the stream half, unless the connection is closed. A closed connection gives up its
    // half here, so the stream is released as soon as both sides have noticed.
    fn live<'a, T>(&self, half: &'a mut Option<T>) -> Result<&'a mut T> {
        if let Some(err) = self.err() {
            *half = None;
            return Err(err);
        }
        half.as_mut().ok_or(Error::Closed)
    }

    // Runs `fut` under `timeout`, giving up early if the connection gets closed meanwhile.
    async fn guard<T>(&self, timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            result = with_deadline(timeout, fut) => result,
            _ = self.closed.cancelled() => Err(self.err().unwrap_or(Error::Closed)),
        }
    }

    // Drops the half the error happened on and latches the error.
    fn fail<T>(&self, half: &mut Option<T>, err: Error) -> Error {
        *half = None;
        self.fatal(err)
    }

    // Latches the first fatal error and closes the stream. A half that is busy right now is
    // released by its holder, which wakes up on the cancelled token and goes through `fail`.
    fn fatal(&self, err: Error) -> Error {
        {
            let mut state = self.state();
            if !matches!(state.status, Status::Open) {
                return err;
            }
            warn!(
                connection_id = %self.id,
                addr = self.addr.as_deref().unwrap_or("-"),
                error = %err,
                "connection failed"
            );
            state.status = Status::Closed(err.clone());
        }
        self.closed.cancel();

        if let Ok(mut reader) = self.reader.try_lock() {
            reader.stream = None;
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.stream = None;
        }
        err
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

async fn write_command<W>(stream: &mut W, buf: &mut BytesMut, cmd: &str, args: &[Arg]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    buf.clear();
    encode::encode_command_into(buf, cmd, args);
    stream.write_all(buf).await?;
    Ok(())
}

async fn read_reply<R>(stream: &mut R, line: &mut Vec<u8>, limits: &Limits) -> Result<Reply>
where
    R: io::AsyncBufRead + Unpin,
{
    wire::read_value(stream, line, limits)
        .await?
        .ok_or_else(|| ProtocolError::ShortLine.into())
}

// A zero timeout means no deadline.
async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}
