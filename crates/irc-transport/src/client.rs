//! IRC client session: a shared writer for outbound commands and the receive
//! loop that keeps the session alive.
//!
//! [`IrcClient`] is cheap to clone and safe to use from any number of tasks;
//! every write goes through one async mutex, so concurrent dispatches never
//! interleave bytes on the wire. [`IrcEventLoop`] owns the read half and must
//! be driven (usually spawned) for the session to register, answer `PING`s
//! and join its channels.
//!
//! The session ends exactly once. Whichever side notices first (a failed or
//! stalled write on the client, `ERROR`/EOF/keepalive timeout on the loop)
//! records the reason; [`IrcEventLoop::run`] then returns it and every later
//! send fails with [`TransportError::NotConnected`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay::{ChannelName, ChatTransport, RenderedLine, TransportError};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::message::{self, IrcMessage, MAX_LINE_BYTES};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Longest inbound line accepted, IRCv3 message tags included. Longer lines
/// are discarded up to their terminating newline.
pub const MAX_INBOUND_LINE_BYTES: usize = 16 * MAX_LINE_BYTES;

/// Nickname retries (each appending `_`) before registration is abandoned.
pub const MAX_NICK_RETRIES: u8 = 3;

const KEEPALIVE_TOKEN: &str = "keepalive";

/// Nickname and real name announced during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub nickname: String,
    pub realname: String,
}

/// Liveness limits for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Silence from the server before the client sends its own `PING`.
    pub idle: Duration,
    /// Time allowed for any server traffic after that `PING`.
    pub pong: Duration,
    /// Time allowed for one outbound line to be written and flushed.
    pub write: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(240),
            pong: Duration::from_secs(60),
            write: Duration::from_secs(60),
        }
    }
}

struct Shared {
    writer: Mutex<BoxedWriter>,
    /// `Some(reason)` once the session has ended.
    ended: watch::Sender<Option<TransportError>>,
    write_timeout: Duration,
}

/// Sending side of an IRC session.
#[derive(Clone)]
pub struct IrcClient {
    shared: Arc<Shared>,
}

impl IrcClient {
    fn new(writer: BoxedWriter, write_timeout: Duration) -> Self {
        let (ended, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(writer),
                ended,
                write_timeout,
            }),
        }
    }

    /// `false` once the session has ended or a write has failed.
    pub fn is_connected(&self) -> bool {
        self.shared.ended.borrow().is_none()
    }

    /// Records why the session ended. The first reason wins.
    fn end(&self, reason: TransportError) {
        self.shared.ended.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(reason);
            true
        });
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut writer = self.shared.writer.lock().await;
        // The session may have ended while this task waited for the lock.
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        let failure = match tokio::time::timeout(self.shared.write_timeout, write).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!(
                "write stalled for more than {}s",
                self.shared.write_timeout.as_secs()
            ),
        };
        let err = TransportError::Io { message: failure };
        self.end(err.clone());
        Err(err)
    }

    /// Joins `channel`.
    pub async fn join(&self, channel: &ChannelName) -> Result<(), TransportError> {
        self.write_line(&message::join(channel.as_str())).await
    }

    /// Sends `QUIT` and ends the session.
    pub async fn quit(&self, reason: &str) -> Result<(), TransportError> {
        let result = self.write_line(&message::quit(reason)).await;
        self.end(TransportError::Closed {
            reason: format!("quit: {reason}"),
        });
        result
    }
}

#[async_trait]
impl ChatTransport for IrcClient {
    async fn send(&self, channel: &ChannelName, line: &RenderedLine) -> Result<(), TransportError> {
        if line.as_str().contains(['\r', '\n']) {
            return Err(TransportError::InvalidLine {
                channel: channel.clone(),
                reason: "line contains CR or LF",
            });
        }
        let framed = message::privmsg(channel.as_str(), line.as_str());
        if framed.len() > MAX_LINE_BYTES {
            return Err(TransportError::InvalidLine {
                channel: channel.clone(),
                reason: "line exceeds 512 bytes once framed",
            });
        }
        self.write_line(&framed).await
    }
}

impl std::fmt::Debug for IrcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrcClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}

enum Wake {
    Ended(TransportError),
    Read(io::Result<usize>),
    Keepalive,
}

/// Receiving side of an IRC session.
pub struct IrcEventLoop {
    reader: BufReader<BoxedReader>,
    client: IrcClient,
    nickname: String,
    channels: Vec<ChannelName>,
    timeouts: SessionTimeouts,
    registered: bool,
    nick_retries: u8,
}

impl IrcEventLoop {
    /// Processes server messages until the session ends, then returns why.
    ///
    /// - `PING` is answered with `PONG`.
    /// - `001` (registration complete) joins every configured channel.
    /// - `433` (nickname in use) before registration retries with `_`
    ///   appended, at most [`MAX_NICK_RETRIES`] times; `432` (erroneous
    ///   nickname) ends the session.
    /// - After [`SessionTimeouts::idle`] of silence the client sends `PING`;
    ///   no traffic within [`SessionTimeouts::pong`] ends the session.
    /// - `ERROR`, end of stream, or a failed write on the client ends the
    ///   session.
    pub async fn run(mut self) -> TransportError {
        let mut ended = self.client.shared.ended.subscribe();
        let mut buf = Vec::with_capacity(MAX_LINE_BYTES);
        let mut discarding = false;
        let mut awaiting_pong = false;
        let mut deadline = Instant::now() + self.timeouts.idle;

        let reason = loop {
            let wake = tokio::select! {
                biased;
                state = ended.wait_for(Option::is_some) => Wake::Ended(
                    state.ok().and_then(|reason| (*reason).clone()).unwrap_or_else(|| {
                        TransportError::Closed {
                            reason: "client dropped".to_string(),
                        }
                    }),
                ),
                read = read_bounded(&mut self.reader, &mut buf) => Wake::Read(read),
                () = tokio::time::sleep_until(deadline) => Wake::Keepalive,
            };

            match wake {
                Wake::Ended(reason) => break reason,
                Wake::Keepalive if awaiting_pong => {
                    break TransportError::Closed {
                        reason: format!(
                            "no reply to keepalive PING within {}s",
                            self.timeouts.pong.as_secs()
                        ),
                    }
                }
                Wake::Keepalive => {
                    tracing::debug!("Server idle, sending keepalive PING");
                    if let Err(err) = self.client.write_line(&message::ping(KEEPALIVE_TOKEN)).await {
                        break err;
                    }
                    awaiting_pong = true;
                    deadline = Instant::now() + self.timeouts.pong;
                }
                Wake::Read(Err(err)) => {
                    break TransportError::Io {
                        message: err.to_string(),
                    }
                }
                Wake::Read(Ok(read)) => {
                    if buf.last() == Some(&b'\n') {
                        awaiting_pong = false;
                        deadline = Instant::now() + self.timeouts.idle;
                        let skip = std::mem::take(&mut discarding);
                        let result = if skip { Ok(()) } else { self.handle_line(&buf).await };
                        buf.clear();
                        if let Err(err) = result {
                            break err;
                        }
                    } else if read == 0 {
                        break TransportError::Closed {
                            reason: "server closed the connection".to_string(),
                        };
                    } else if buf.len() >= MAX_INBOUND_LINE_BYTES {
                        if !discarding {
                            tracing::warn!(
                                limit = MAX_INBOUND_LINE_BYTES,
                                "Discarding oversized line from IRC server"
                            );
                        }
                        discarding = true;
                        buf.clear();
                    }
                }
            }
        };
        self.client.end(reason.clone());
        tracing::warn!(error = %reason, "IRC session ended");
        reason
    }

    async fn handle_line(&mut self, raw: &[u8]) -> Result<(), TransportError> {
        // Servers are not required to send UTF-8.
        let line = String::from_utf8_lossy(raw);
        match IrcMessage::parse(&line) {
            Some(msg) => self.handle(&msg).await,
            None => Ok(()),
        }
    }

    async fn handle(&mut self, msg: &IrcMessage) -> Result<(), TransportError> {
        match msg.command.as_str() {
            "PING" => {
                let token = msg.trailing().unwrap_or_default();
                self.client.write_line(&message::pong(token)).await
            }
            "001" => {
                self.registered = true;
                tracing::info!(nickname = %self.nickname, "Registered with IRC server");
                for channel in &self.channels {
                    tracing::info!(channel = %channel, "Joining channel");
                    self.client.join(channel).await?;
                }
                Ok(())
            }
            "433" if !self.registered => {
                if self.nick_retries >= MAX_NICK_RETRIES {
                    return Err(TransportError::Closed {
                        reason: format!(
                            "nickname '{}' still in use after {MAX_NICK_RETRIES} retries",
                            self.nickname
                        ),
                    });
                }
                self.nick_retries += 1;
                self.nickname.push('_');
                tracing::warn!(nickname = %self.nickname, "Nickname in use, retrying");
                self.client.write_line(&message::nick(&self.nickname)).await
            }
            "432" if !self.registered => Err(TransportError::Closed {
                reason: format!(
                    "nickname '{}' rejected: {}",
                    self.nickname,
                    msg.trailing().unwrap_or("erroneous nickname")
                ),
            }),
            "JOIN" if msg.source_nick() == Some(self.nickname.as_str()) => {
                tracing::debug!(channel = msg.params.first().map(String::as_str).unwrap_or(""), "Joined");
                Ok(())
            }
            "ERROR" => Err(TransportError::Closed {
                reason: msg.trailing().unwrap_or("ERROR").to_string(),
            }),
            _ => {
                tracing::trace!(command = %msg.command, params = ?msg.params, "Ignoring IRC message");
                Ok(())
            }
        }
    }
}

/// Reads towards the next newline without letting `buf` grow past
/// [`MAX_INBOUND_LINE_BYTES`]. Partial reads stay in `buf`, so the future can
/// be dropped and called again.
async fn read_bounded(reader: &mut BufReader<BoxedReader>, buf: &mut Vec<u8>) -> io::Result<usize> {
    let remaining = MAX_INBOUND_LINE_BYTES.saturating_sub(buf.len()) as u64;
    reader.take(remaining).read_until(b'\n', buf).await
}

impl std::fmt::Debug for IrcEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrcEventLoop")
            .field("nickname", &self.nickname)
            .field("channels", &self.channels)
            .field("timeouts", &self.timeouts)
            .field("registered", &self.registered)
            .finish()
    }
}

/// Registers over an already established stream.
///
/// Sends `NICK` and `USER` and returns the session halves. `channels` are
/// joined once the server confirms registration.
pub async fn start<S>(
    stream: S,
    registration: &Registration,
    channels: Vec<ChannelName>,
    timeouts: SessionTimeouts,
) -> Result<(IrcClient, IrcEventLoop), TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let client = IrcClient::new(Box::new(write_half), timeouts.write);

    client
        .write_line(&message::nick(&registration.nickname))
        .await?;
    client
        .write_line(&message::user(&registration.nickname, &registration.realname))
        .await?;

    let event_loop = IrcEventLoop {
        reader: BufReader::new(Box::new(read_half) as BoxedReader),
        client: client.clone(),
        nickname: registration.nickname.clone(),
        channels,
        timeouts,
        registered: false,
        nick_retries: 0,
    };
    Ok((client, event_loop))
}
