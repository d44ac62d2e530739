//! # Scripted TCP Server
//!
//! Accept manager connections, run the handshake, and answer every other
//! command through a pluggable handler.
//!
//! ## Design Principles
//! 1. **Incremental Decode**: Bytes accumulate in a `BytesMut`; frames are
//!    popped only once complete, as on a real server.
//! 2. **Scriptable Faults**: Replies can be delayed, chunked, preceded by a
//!    ping, replaced by raw bytes, or swapped for a dropped connection.
//! 3. **Observable**: Every business command is logged with the connection
//!    that carried it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mgw_proto::auth::{self, PREAMBLE, SRV_RAND, SRV_RAND_ANSWER};
use mgw_proto::{names, Command, FrameCodec, FrameDecoder, Reassembler, Utf16Codec, RETCODE, RETCODE_SUCCESS};

/// Retcode sent when the login is unknown or the digest does not match.
const RETCODE_AUTH_FAILED: &str = "3006 Invalid account or password";

/// Retcode sent for business commands before a successful handshake.
const RETCODE_NOT_AUTHORIZED: &str = "8 Not authorized";

/// Credentials and challenge the server expects.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub login: String,
    pub password: String,
    /// Hex challenge sent in every `AUTH_START` reply.
    pub srv_rand: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        MockConfig {
            login: "1001".to_string(),
            password: "p@ss".to_string(),
            srv_rand: "00112233445566778899aabbccddeeff".to_string(),
        }
    }
}

/// How the server answers one business command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// One unfragmented frame.
    Command(Command),
    /// The command text split into frames of at most `n` body bytes.
    Chunked(Command, usize),
    /// Bytes written verbatim.
    Raw(Vec<u8>),
    /// A zero-length frame, then the inner reply.
    PingThen(Box<Reply>),
    /// Wait, then the inner reply.
    Delay(Duration, Box<Reply>),
    /// Close the connection without answering.
    Drop,
}

impl Reply {
    /// `RETCODE=0 Done` plus the given parameters.
    pub fn ok(name: &str, params: &[(&str, &str)]) -> Reply {
        let mut cmd = Command::new(name).param(RETCODE, RETCODE_SUCCESS);
        for (k, v) in params {
            cmd = cmd.param(*k, *v);
        }
        Reply::Command(cmd)
    }

    /// A reply carrying a non-success retcode.
    pub fn retcode(name: &str, retcode: &str) -> Reply {
        Reply::Command(Command::new(name).param(RETCODE, retcode))
    }

    pub fn delayed(self, after: Duration) -> Reply {
        Reply::Delay(after, Box::new(self))
    }
}

/// Business command handler.
pub type Handler = Arc<dyn Fn(&Command) -> Reply + Send + Sync>;

/// A business command as received.
#[derive(Debug, Clone)]
pub struct LoggedCommand {
    /// Accept order of the carrying connection, from zero.
    pub connection: usize,
    pub command: Command,
}

struct MockState {
    config: MockConfig,
    handler: Handler,
    codec: FrameCodec,
    connections: AtomicUsize,
    pings: AtomicUsize,
    quits: AtomicUsize,
    log: Mutex<Vec<LoggedCommand>>,
}

/// Running mock server; stops accepting when dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Binds an ephemeral loopback port and starts accepting.
    pub async fn start<F>(config: MockConfig, handler: F) -> io::Result<MockServer>
    where
        F: Fn(&Command) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState {
            config,
            handler: Arc::new(handler),
            codec: FrameCodec::new(Utf16Codec::new()),
            connections: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            quits: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let id = accept_state.connections.fetch_add(1, Ordering::SeqCst);
                debug!(connection = id, %peer, "connection accepted");
                let conn_state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, id, conn_state).await {
                        debug!(connection = id, error = %err, "connection ended with error");
                    }
                });
            }
        });

        Ok(MockServer { addr, state, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Keepalive frames received so far.
    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// `QUIT` frames received so far.
    pub fn quits(&self) -> usize {
        self.state.quits.load(Ordering::SeqCst)
    }

    /// Polls until `expected` quits have arrived or `limit` passes.
    ///
    /// Client shutdown returns before the farewell frame is read here.
    pub async fn wait_for_quits(&self, expected: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.quits() < expected {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Business commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<LoggedCommand> {
        self.state.log.lock().expect("mock log poisoned").clone()
    }

    /// Business commands with the given name.
    pub fn commands_named(&self, name: &str) -> Vec<LoggedCommand> {
        self.commands()
            .into_iter()
            .filter(|entry| entry.command.name == name)
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serves one client connection until it closes or sends `QUIT`.
async fn handle_connection(mut stream: TcpStream, id: usize, state: Arc<MockState>) -> io::Result<()> {
    let mut preamble = [0u8; PREAMBLE.len()];
    stream.read_exact(&mut preamble).await?;
    if &preamble != PREAMBLE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad preamble"));
    }

    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut decoder = FrameDecoder::new();
    let mut assembler = Reassembler::new();
    let mut authenticated = false;

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }

        loop {
            let frame = match decoder.decode(&mut buffer).map_err(invalid_data)? {
                Some(frame) => frame,
                None => break,
            };

            if frame.header.is_ping() {
                state.pings.fetch_add(1, Ordering::SeqCst);
                stream.write_all(&state.codec.encode_ping()).await?;
                continue;
            }

            let body = match assembler.push(&frame.header, &frame.body) {
                Some(body) => body,
                None => continue,
            };
            let text = state.codec.decode_body(&body).map_err(invalid_data)?;
            let command = Command::parse(&text).map_err(invalid_data)?;

            let reply = match command.name.as_str() {
                names::QUIT => {
                    state.quits.fetch_add(1, Ordering::SeqCst);
                    debug!(connection = id, "quit received");
                    return Ok(());
                }
                names::AUTH_START => auth_start_reply(&state.config, &command),
                names::AUTH_ANSWER => {
                    let reply = auth_answer_reply(&state, &command);
                    authenticated = matches!(&reply, Reply::Command(cmd) if cmd.is_success());
                    reply
                }
                _ if !authenticated => Reply::retcode(&command.name, RETCODE_NOT_AUTHORIZED),
                _ => {
                    state.log.lock().expect("mock log poisoned").push(LoggedCommand {
                        connection: id,
                        command: command.clone(),
                    });
                    (state.handler)(&command)
                }
            };

            if !write_reply(&mut stream, &state.codec, reply).await? {
                debug!(connection = id, "dropping connection on request");
                return Ok(());
            }
        }
    }
}

fn auth_start_reply(config: &MockConfig, command: &Command) -> Reply {
    if command.get("LOGIN") != Some(config.login.as_str()) {
        return Reply::retcode(names::AUTH_START, RETCODE_AUTH_FAILED);
    }
    Reply::ok(names::AUTH_START, &[(SRV_RAND, config.srv_rand.as_str())])
}

fn auth_answer_reply(state: &MockState, command: &Command) -> Reply {
    let answer = command.get(SRV_RAND_ANSWER).unwrap_or_default();
    let config = &state.config;
    if auth::verify_answer(state.codec.text(), &config.password, &config.srv_rand, answer) {
        Reply::ok(names::AUTH_ANSWER, &[])
    } else {
        Reply::retcode(names::AUTH_ANSWER, RETCODE_AUTH_FAILED)
    }
}

/// Writes `reply`; returns `false` when the connection should close.
async fn write_reply(stream: &mut TcpStream, codec: &FrameCodec, reply: Reply) -> io::Result<bool> {
    let mut reply = reply;
    loop {
        match reply {
            Reply::Delay(after, inner) => {
                tokio::time::sleep(after).await;
                reply = *inner;
            }
            Reply::PingThen(inner) => {
                stream.write_all(&codec.encode_ping()).await?;
                reply = *inner;
            }
            Reply::Command(cmd) => {
                let frame = codec.encode_command(&cmd).map_err(invalid_data)?;
                stream.write_all(&frame).await?;
                return Ok(true);
            }
            Reply::Chunked(cmd, max_chunk) => {
                let frames = codec.encode_chunked(&cmd.to_text(), max_chunk).map_err(invalid_data)?;
                stream.write_all(&frames).await?;
                return Ok(true);
            }
            Reply::Raw(bytes) => {
                stream.write_all(&bytes).await?;
                return Ok(true);
            }
            Reply::Drop => return Ok(false),
        }
    }
}

fn invalid_data<E: std::error::Error + Send + Sync + 'static>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
