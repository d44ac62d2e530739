//! Error types for the manager client.

use std::time::Duration;

use mgw_proto::{ProtocolError, ReadError};
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by sessions and the pool.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect (or the preamble write) failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Handshake step answered with a non-success retcode.
    #[error("authentication rejected: {retcode}")]
    Auth { retcode: String },

    /// Malformed frame, header or body text.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Request could not be framed; nothing was written.
    #[error("request encode failed: {0}")]
    Encode(#[source] ProtocolError),

    /// Read or write failed mid-exchange.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Business command answered with a non-success retcode.
    #[error("{command} retcode error: {retcode}")]
    Remote { command: String, retcode: String },

    /// Caller-side wait expired; the server round trip is not cancelled.
    #[error("timeout expired after {0:?}")]
    Timeout(Duration),

    /// Session has no live connection (it is reconnecting).
    #[error("session is not connected")]
    Disconnected,

    /// Session or pool was shut down.
    #[error("client is closed")]
    Closed,

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reply lacked a parameter the command needs, or it did not parse.
    #[error("{command} reply has no usable {field}")]
    BadReply { command: String, field: &'static str },

    /// Response payload did not match the expected JSON shape.
    #[error("payload decode error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ClientError {
    /// True for failures that leave the connection unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Protocol(_) | ClientError::Disconnected
        )
    }

    /// Retcode text for `Auth` and `Remote` errors.
    pub fn retcode(&self) -> Option<&str> {
        match self {
            ClientError::Auth { retcode } | ClientError::Remote { retcode, .. } => Some(retcode),
            _ => None,
        }
    }
}

impl From<ReadError> for ClientError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Io(err) => ClientError::Io(err),
            ReadError::Protocol(err) => ClientError::Protocol(err),
        }
    }
}
