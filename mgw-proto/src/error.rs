//! Error types for mgw-proto.

use thiserror::Error;

/// Framing and text-format violations.
///
/// None of these carry an I/O cause; a `ProtocolError` always means the bytes
/// were received (or produced) but do not follow the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A header field is not plain ASCII hexadecimal.
    #[error("invalid {field} in frame header: {raw:?}")]
    InvalidHeader { field: &'static str, raw: String },

    /// Encoded body does not fit the 16-bit length field.
    #[error("frame body of {0} bytes exceeds the 0xffff header limit")]
    BodyTooLarge(usize),

    /// Flag does not fit a single hex nibble.
    #[error("frame flag {0:#x} does not fit a nibble")]
    InvalidFlag(u8),

    /// Body bytes are not valid UTF-16LE.
    #[error("body is not valid UTF-16LE")]
    InvalidUtf16,

    /// Command text has no CRLF between the header line and the payload.
    #[error("command text has no CRLF line terminator")]
    MissingLineTerminator,

    /// A hex-encoded handshake value could not be decoded.
    #[error("invalid hex in {field}")]
    InvalidHex { field: &'static str },
}

/// Failure while pulling a message off an async reader.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Socket read failed or hit EOF mid-frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes arrived but did not form a valid frame or command.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type alias using ProtocolError.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
