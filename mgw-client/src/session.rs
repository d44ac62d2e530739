//! # Session
//!
//! Purpose: Own one authenticated TCP connection to the manager server and
//! run synchronous request/response exchanges over it.
//!
//! ## Design Principles
//! 1. **Single Owner**: The connection lives behind one async mutex; only the
//!    command loop and the keepalive task ever touch it.
//! 2. **Whole Exchange Under Lock**: A request holds the lock across its write
//!    and the matching read, so no keepalive frame lands between them.
//! 3. **Fail The Call, Heal The Link**: A transport failure drops the
//!    connection and fails the current call; `restore` brings the link back
//!    for later calls without retrying the failed one.
//! 4. **Stable Identity**: Reconnecting replaces the connection, never the
//!    session or its id.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Authenticating -> Ready
//! Ready -> Reconnecting -> Handshaking -> Authenticating -> Ready
//! any -> Closed (terminal)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use mgw_proto::auth::{self, SRV_RAND};
use mgw_proto::command::LINE_TERMINATOR;
use mgw_proto::{names, Command, FrameCodec, ProtocolError, Utf16Codec};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::PoolMetrics;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Handshaking = 2,
    Authenticating = 3,
    Ready = 4,
    Reconnecting = 5,
    Closed = 6,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SessionState::Connecting,
            2 => SessionState::Handshaking,
            3 => SessionState::Authenticating,
            4 => SessionState::Ready,
            5 => SessionState::Reconnecting,
            6 => SessionState::Closed,
            _ => SessionState::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One authenticated connection.
struct Connection {
    // Buffered reader; writes go straight to the inner stream.
    reader: BufReader<TcpStream>,
    // Set by every completed exchange, cleared by each keepalive tick.
    active: bool,
}

impl Connection {
    /// Writes one frame and reads one reassembled command back.
    async fn exchange(&mut self, codec: &FrameCodec, frame: &[u8]) -> ClientResult<Command> {
        let stream = self.reader.get_mut();
        stream.write_all(frame).await?;
        stream.flush().await?;

        let reply = codec.read_command(&mut self.reader).await?;
        self.active = true;
        Ok(reply)
    }

    async fn send_ping(&mut self, codec: &FrameCodec) -> std::io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&codec.encode_ping()).await?;
        stream.flush().await
    }
}

/// A single manager session within a pool.
pub struct Session {
    id: usize,
    config: Arc<ClientConfig>,
    codec: FrameCodec,
    link: Mutex<Option<Connection>>,
    state: AtomicU8,
    metrics: Arc<PoolMetrics>,
}

impl Session {
    /// Connects and authenticates a new session.
    ///
    /// The whole handshake is bounded by `connect_timeout`.
    pub async fn open(
        id: usize,
        config: Arc<ClientConfig>,
        metrics: Arc<PoolMetrics>,
    ) -> ClientResult<Arc<Session>> {
        let session = Arc::new(Session {
            id,
            config,
            codec: FrameCodec::new(Utf16Codec::new()),
            link: Mutex::new(None),
            state: AtomicU8::new(SessionState::Disconnected as u8),
            metrics,
        });

        session.transition(SessionState::Connecting);
        let conn = session.establish().await.inspect_err(|_| {
            session.transition(SessionState::Disconnected);
        })?;
        *session.link.lock().await = Some(conn);
        session.transition(SessionState::Ready);
        info!(session = id, addr = %session.config.addr(), "session ready");
        Ok(session)
    }

    /// Position of this session in its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// True when a live connection is held.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Runs one request/response exchange.
    ///
    /// **Logic**:
    /// 1. Encode the frame; an oversized body fails without touching the link.
    /// 2. Lock the link and fail with `Disconnected` when it is gone.
    /// 3. Write, then read until one full command is assembled.
    /// 4. On any transport or framing failure, drop the link, mark the session
    ///    `Reconnecting` and return the error. The call is not retried.
    pub async fn send_request(&self, command: &Command) -> ClientResult<Command> {
        let frame = self.codec.encode_command(command).map_err(ClientError::Encode)?;

        let mut link = self.link.lock().await;
        let conn = match link.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::Disconnected),
        };

        trace!(session = self.id, command = %command.name, bytes = frame.len(), "request sent");
        match conn.exchange(&self.codec, &frame).await {
            Ok(reply) => {
                trace!(session = self.id, reply = %reply, "response received");
                Ok(reply)
            }
            Err(err) => {
                warn!(session = self.id, command = %command.name, error = %err, "exchange failed, dropping connection");
                *link = None;
                self.transition(SessionState::Reconnecting);
                Err(err)
            }
        }
    }

    /// Re-establishes the connection until it succeeds or the session closes.
    ///
    /// Returns immediately when a connection is already held. Attempts are
    /// spaced by `reconnect_delay` and never give up.
    pub async fn restore(&self) {
        let mut attempt: u64 = 0;
        loop {
            if self.state() == SessionState::Closed {
                return;
            }

            {
                let mut link = self.link.lock().await;
                if link.is_some() || self.state() == SessionState::Closed {
                    return;
                }

                attempt += 1;
                self.transition(SessionState::Reconnecting);
                match self.establish().await {
                    Ok(conn) => {
                        if self.state() == SessionState::Closed {
                            return;
                        }
                        *link = Some(conn);
                        self.transition(SessionState::Ready);
                        self.metrics.record_reconnect();
                        info!(session = self.id, attempt, "session restored");
                        return;
                    }
                    Err(err) => {
                        self.transition(SessionState::Reconnecting);
                        warn!(session = self.id, attempt, error = %err, "reconnect attempt failed");
                    }
                }
            }

            time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Moves to `Closed` without touching the link.
    ///
    /// A `restore` loop in progress exits before its next attempt; the
    /// connection itself is released later by `shutdown`.
    pub fn begin_close(&self) {
        let prev = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if prev != SessionState::Closed as u8 {
            debug!(session = self.id, from = %SessionState::from_u8(prev), "closing");
        }
    }

    /// Sends `QUIT`, closes the socket and moves to `Closed`.
    ///
    /// The socket is released even when the farewell write fails; the first
    /// error is returned.
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.state.store(SessionState::Closed as u8, Ordering::Release);

        let conn = self.link.lock().await.take();
        let mut conn = match conn {
            Some(conn) => conn,
            None => {
                debug!(session = self.id, "shutdown without a live connection");
                return Ok(());
            }
        };

        let quit = self
            .codec
            .encode(&format!("{}{}", names::QUIT, LINE_TERMINATOR), 0, 0)?;
        let stream = conn.reader.get_mut();
        let sent = stream.write_all(&quit).await;
        let closed = stream.shutdown().await;
        drop(conn);

        info!(session = self.id, "session closed");
        sent?;
        closed?;
        Ok(())
    }

    /// Connects, writes the preamble and authenticates.
    async fn establish(&self) -> ClientResult<Connection> {
        let limit = self.config.connect_timeout;
        match time::timeout(limit, self.connect_and_authenticate()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Connect {
                addr: self.config.addr(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake timed out"),
            }),
        }
    }

    async fn connect_and_authenticate(&self) -> ClientResult<Connection> {
        let addr = self.config.addr();
        let connect_err = |source| ClientError::Connect {
            addr: addr.clone(),
            source,
        };

        let stream = TcpStream::connect(&addr).await.map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;
        let mut conn = Connection {
            reader: BufReader::new(stream),
            active: false,
        };

        self.transition(SessionState::Handshaking);
        conn.reader
            .get_mut()
            .write_all(auth::PREAMBLE)
            .await
            .map_err(connect_err)?;

        self.transition(SessionState::Authenticating);
        self.authenticate(&mut conn).await?;
        conn.active = false;
        Ok(conn)
    }

    /// Two round trips: `AUTH_START` for the challenge, `AUTH_ANSWER` with the digest.
    async fn authenticate(&self, conn: &mut Connection) -> ClientResult<()> {
        let config = &self.config;
        let start = auth::auth_start(&config.version, &config.agent, &config.login);
        let frame = self.codec.encode_command(&start)?;
        let reply = conn.exchange(&self.codec, &frame).await?;
        check_auth_reply(&reply)?;

        let srv_rand = reply
            .get(SRV_RAND)
            .ok_or(ClientError::Protocol(ProtocolError::InvalidHex { field: SRV_RAND }))?;
        let answer = auth::challenge_answer(self.codec.text(), &config.password, srv_rand)?;
        let cli_rand = auth::client_rand(&auth::random_nonce());
        debug!(session = self.id, login = %config.login, "challenge received, answering");

        let frame = self.codec.encode_command(&auth::auth_answer(&answer, &cli_rand))?;
        let reply = conn.exchange(&self.codec, &frame).await?;
        check_auth_reply(&reply)
    }

    /// Stores `next` unless the session is already closed.
    fn transition(&self, next: SessionState) {
        let result = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
            if raw == SessionState::Closed as u8 {
                None
            } else {
                Some(next as u8)
            }
        });
        if let Ok(prev) = result {
            let prev = SessionState::from_u8(prev);
            if prev != next {
                debug!(session = self.id, from = %prev, to = %next, "state change");
            }
        }
    }

    /// One keepalive tick.
    ///
    /// Returns `false` when the ping write failed and the link was dropped.
    async fn keepalive_tick(&self) -> bool {
        let mut link = match self.link.try_lock() {
            Ok(link) => link,
            Err(_) => {
                trace!(session = self.id, "link busy, keepalive skipped");
                return true;
            }
        };
        let conn = match link.as_mut() {
            Some(conn) => conn,
            None => return true,
        };
        if conn.active {
            conn.active = false;
            return true;
        }

        match conn.send_ping(&self.codec).await {
            Ok(()) => {
                trace!(session = self.id, "keepalive sent");
                true
            }
            Err(err) => {
                warn!(session = self.id, error = %err, "keepalive failed, dropping connection");
                *link = None;
                self.transition(SessionState::Reconnecting);
                false
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

fn check_auth_reply(reply: &Command) -> ClientResult<()> {
    if reply.is_success() {
        return Ok(());
    }
    Err(ClientError::Auth {
        retcode: reply.retcode().unwrap_or_default().to_string(),
    })
}

/// Spawns the keepalive timer for `session`.
///
/// The task holds only a weak reference and stops once the session is closed
/// or dropped. A tick pings only when no exchange completed since the last
/// tick, and never while a request holds the link.
pub fn spawn_keepalive(session: &Arc<Session>) -> JoinHandle<()> {
    let weak: Weak<Session> = Arc::downgrade(session);
    let period = session.config.ping_interval;

    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let session = match weak.upgrade() {
                Some(session) => session,
                None => break,
            };
            if session.state() == SessionState::Closed {
                break;
            }
            if !session.keepalive_tick().await {
                session.restore().await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Handshaking,
            SessionState::Authenticating,
            SessionState::Ready,
            SessionState::Reconnecting,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn auth_reply_carries_literal_retcode() {
        let reply = Command::new(names::AUTH_ANSWER).param("RETCODE", "3006 Invalid password");
        let err = check_auth_reply(&reply).unwrap_err();
        assert!(matches!(err, ClientError::Auth { ref retcode } if retcode == "3006 Invalid password"));

        let ok = Command::new(names::AUTH_ANSWER).param("RETCODE", "0 Done");
        assert!(check_auth_reply(&ok).is_ok());
    }

    #[tokio::test]
    async fn open_fails_with_connect_error_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = Arc::new(ClientConfig {
            port,
            login: "1".to_string(),
            ..ClientConfig::default()
        });
        let err = Session::open(0, config, Arc::new(PoolMetrics::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
