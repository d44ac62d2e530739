//! # Frame Codec
//!
//! Purpose: Encode and decode the 9-byte hex header plus UTF-16LE body that
//! wraps every command on the wire, and reassemble fragmented responses.
//!
//! ## Design Principles
//! 1. **Header Equals Body**: The length field is always computed from the
//!    encoded body; callers never supply it.
//! 2. **Pure Core**: Header and body conversion are plain functions; the async
//!    readers only add `read_exact` on top.
//! 3. **Pings Are Invisible**: Zero-length frames are keepalive echoes and are
//!    never surfaced as commands.
//! 4. **Decode Once**: Continuation chunks are concatenated as raw bytes and
//!    decoded together, so a chunk boundary may split a UTF-16 code unit.
//!
//! ## Wire Layout
//!
//! ```text
//! +-------------+-------------+---------+------------------------+
//! | body_len:4  | seq:4       | flag:1  | body: body_len bytes   |
//! | ASCII hex   | ASCII hex   | hex     | UTF-16LE, no BOM       |
//! +-------------+-------------+---------+------------------------+
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::Utf16Codec;
use crate::command::Command;
use crate::error::{ProtocolError, ProtocolResult, ReadError};

/// Header size in bytes.
pub const HEADER_LEN: usize = 9;

/// Largest body the 4-digit length field can describe.
pub const MAX_BODY_LEN: usize = 0xFFFF;

/// Largest value of the single-digit flag field.
pub const MAX_FLAG: u8 = 0xF;

/// Flag bit marking a non-final chunk of a fragmented body.
pub const FLAG_CONTINUATION: u8 = 0x1;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Body length in bytes.
    pub body_len: u16,
    /// Packet sequence number.
    pub seq: u16,
    /// Flag nibble.
    pub flag: u8,
}

impl FrameHeader {
    /// Builds a header, validating the field ranges.
    pub fn new(body_len: usize, seq: u16, flag: u8) -> ProtocolResult<Self> {
        if body_len > MAX_BODY_LEN {
            return Err(ProtocolError::BodyTooLarge(body_len));
        }
        if flag > MAX_FLAG {
            return Err(ProtocolError::InvalidFlag(flag));
        }
        Ok(FrameHeader {
            body_len: body_len as u16,
            seq,
            flag,
        })
    }

    /// Header of a keepalive frame.
    pub const fn ping() -> Self {
        FrameHeader {
            body_len: 0,
            seq: 0,
            flag: 0,
        }
    }

    #[inline]
    pub fn is_ping(&self) -> bool {
        self.body_len == 0
    }

    #[inline]
    pub fn is_continuation(&self) -> bool {
        self.flag & FLAG_CONTINUATION != 0
    }

    /// Encodes the header as `%04x%04x%01x`.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        write_hex(&mut buf[0..4], self.body_len as u32);
        write_hex(&mut buf[4..8], self.seq as u32);
        write_hex(&mut buf[8..9], (self.flag & MAX_FLAG) as u32);
        buf
    }

    /// Decodes a header.
    ///
    /// Every byte must be an ASCII hex digit; signs and whitespace are
    /// rejected.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> ProtocolResult<Self> {
        let body_len = parse_hex(&buf[0..4], "body length")?;
        let seq = parse_hex(&buf[4..8], "packet number")?;
        let flag = parse_hex(&buf[8..9], "flag")?;
        FrameHeader::new(body_len as usize, seq as u16, flag as u8)
    }
}

/// One header plus its raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    /// Raw UTF-16LE body bytes.
    pub body: Bytes,
}

/// Accumulates continuation chunks until a terminal chunk arrives.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    chunks: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame.
    ///
    /// Returns the full body once a terminal chunk completes it. Ping frames
    /// are ignored and leave any partial body untouched.
    pub fn push(&mut self, header: &FrameHeader, body: &[u8]) -> Option<Vec<u8>> {
        if header.is_ping() {
            return None;
        }
        self.buf.extend_from_slice(body);
        if header.is_continuation() {
            self.chunks += 1;
            return None;
        }
        self.chunks = 0;
        Some(std::mem::take(&mut self.buf))
    }

    /// Number of continuation chunks held so far.
    pub fn pending_chunks(&self) -> usize {
        self.chunks
    }
}

/// Frame encoder/decoder bound to a text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    text: Utf16Codec,
}

impl FrameCodec {
    pub fn new(text: Utf16Codec) -> Self {
        FrameCodec { text }
    }

    pub fn text(&self) -> &Utf16Codec {
        &self.text
    }

    /// Encodes `body` into a single frame.
    ///
    /// Fails with `BodyTooLarge` when the UTF-16LE body exceeds 0xFFFF bytes.
    pub fn encode(&self, body: &str, seq: u16, flag: u8) -> ProtocolResult<Vec<u8>> {
        let len = self.text.encoded_len(body);
        let header = FrameHeader::new(len, seq, flag)?;
        let mut out = Vec::with_capacity(HEADER_LEN + len);
        out.extend_from_slice(&header.encode());
        self.text.encode_into(body, &mut out);
        Ok(out)
    }

    /// Encodes a command as one unfragmented frame.
    pub fn encode_command(&self, command: &Command) -> ProtocolResult<Vec<u8>> {
        self.encode(&command.to_text(), 0, 0)
    }

    /// Encodes `body` as a run of frames of at most `max_chunk` body bytes.
    ///
    /// All chunks but the last carry the continuation flag; sequence numbers
    /// count up from zero.
    pub fn encode_chunked(&self, body: &str, max_chunk: usize) -> ProtocolResult<Vec<u8>> {
        let encoded = self.text.encode(body);
        if encoded.is_empty() {
            return self.encode(body, 0, 0);
        }
        let max_chunk = max_chunk.clamp(1, MAX_BODY_LEN);
        let frames = encoded.len().div_ceil(max_chunk);
        let mut out = Vec::with_capacity(encoded.len() + frames * HEADER_LEN);
        let mut chunks = encoded.chunks(max_chunk).peekable();
        let mut seq: u16 = 0;
        while let Some(chunk) = chunks.next() {
            let flag = if chunks.peek().is_some() { FLAG_CONTINUATION } else { 0 };
            let header = FrameHeader::new(chunk.len(), seq, flag)?;
            out.extend_from_slice(&header.encode());
            out.extend_from_slice(chunk);
            seq = seq.wrapping_add(1);
        }
        Ok(out)
    }

    /// Encodes a zero-length keepalive frame.
    pub fn encode_ping(&self) -> [u8; HEADER_LEN] {
        FrameHeader::ping().encode()
    }

    /// Decodes a complete body into text.
    pub fn decode_body(&self, body: &[u8]) -> ProtocolResult<String> {
        self.text.decode(body)
    }

    /// Reads and decodes one header, looping over short reads.
    pub async fn read_header<R>(&self, reader: &mut R) -> Result<FrameHeader, ReadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut buf).await?;
        Ok(FrameHeader::decode(&buf)?)
    }

    /// Reads exactly `len` body bytes and decodes them as text.
    pub async fn read_body<R>(&self, reader: &mut R, len: usize) -> Result<String, ReadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        Ok(self.text.decode(&buf)?)
    }

    /// Reads frames until one full command is assembled.
    ///
    /// **Logic**:
    /// 1. Read a header; skip it if it is a ping.
    /// 2. Read its body and feed the reassembler.
    /// 3. On a terminal chunk, decode the accumulated bytes and parse them.
    pub async fn read_command<R>(&self, reader: &mut R) -> Result<Command, ReadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut assembler = Reassembler::new();
        loop {
            let header = self.read_header(reader).await?;
            if header.is_ping() {
                tracing::trace!(seq = header.seq, "keepalive echo skipped");
                continue;
            }

            let mut body = vec![0u8; header.body_len as usize];
            reader.read_exact(&mut body).await?;
            if let Some(bytes) = assembler.push(&header, &body) {
                let text = self.text.decode(&bytes)?;
                return Ok(Command::parse(&text)?);
            }
            tracing::trace!(
                seq = header.seq,
                chunks = assembler.pending_chunks(),
                "continuation chunk buffered"
            );
        }
    }
}

/// Incremental frame decoder over a growable buffer.
///
/// Used on the accepting side of a connection where bytes arrive in arbitrary
/// slices. A partial frame is left in the buffer untouched.
#[derive(Debug, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder
    }

    /// Pops one frame from `buf` if a complete one is present.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ProtocolResult<Option<Frame>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&buf[..HEADER_LEN]);
        let header = FrameHeader::decode(&raw)?;

        let total = HEADER_LEN + header.body_len as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let body = buf.split_to(header.body_len as usize).freeze();
        Ok(Some(Frame { header, body }))
    }
}

fn write_hex(out: &mut [u8], mut value: u32) {
    for slot in out.iter_mut().rev() {
        *slot = HEX_DIGITS[(value & 0xF) as usize];
        value >>= 4;
    }
}

fn parse_hex(field: &[u8], name: &'static str) -> ProtocolResult<u32> {
    let mut value: u32 = 0;
    for &b in field {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(ProtocolError::InvalidHeader {
                    field: name,
                    raw: String::from_utf8_lossy(field).into_owned(),
                })
            }
        };
        value = (value << 4) | digit as u32;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn codec() -> FrameCodec {
        FrameCodec::new(Utf16Codec::new())
    }

    #[test]
    fn encodes_lowercase_fixed_width_header() {
        let header = FrameHeader::new(0x12, 0xa, 0x1).unwrap();
        assert_eq!(&header.encode(), b"0012000a1");
    }

    #[test]
    fn header_length_matches_encoded_body() {
        let frame = codec().encode("AUTH_START|\r\n", 0, 0).unwrap();
        assert_eq!(&frame[..HEADER_LEN], b"001a00000");
        assert_eq!(frame.len(), HEADER_LEN + 0x1a);
    }

    #[test]
    fn decodes_header_fields() {
        let header = FrameHeader::decode(b"ffff00ff1").unwrap();
        assert_eq!(header.body_len, 0xffff);
        assert_eq!(header.seq, 0xff);
        assert!(header.is_continuation());
    }

    #[test]
    fn decodes_uppercase_hex() {
        let header = FrameHeader::decode(b"00AB00000").unwrap();
        assert_eq!(header.body_len, 0xab);
    }

    #[test]
    fn rejects_non_hex_fields() {
        for raw in [b"00g000000", b"+fff00000", b"0000 0000", b"00000000z"] {
            let err = FrameHeader::decode(raw).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidHeader { .. }), "{:?}", raw);
        }
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert_eq!(
            FrameHeader::new(MAX_BODY_LEN + 1, 0, 0),
            Err(ProtocolError::BodyTooLarge(MAX_BODY_LEN + 1))
        );
        assert_eq!(FrameHeader::new(0, 0, 0x10), Err(ProtocolError::InvalidFlag(0x10)));
    }

    #[test]
    fn encode_rejects_oversized_body() {
        // 32768 UTF-16 units = 65536 bytes, one past the limit.
        let body = "a".repeat(32_768);
        assert_eq!(codec().encode(&body, 0, 0), Err(ProtocolError::BodyTooLarge(65_536)));

        let body = "a".repeat(32_767);
        assert!(codec().encode(&body, 0, 0).is_ok());
    }

    #[test]
    fn ping_is_all_zero_header() {
        assert_eq!(&codec().encode_ping(), b"000000000");
        assert!(FrameHeader::decode(b"000000000").unwrap().is_ping());
    }

    #[tokio::test]
    async fn header_and_body_reproduce_text() {
        let codec = codec();
        for body in ["", "x", "DEAL_GET_TOTAL|RETCODE=0 Done|TOTAL=7|\r\n", "\u{4e2d}\u{6587} \u{1F600}"] {
            let frame = codec.encode(body, 3, 0).unwrap();
            let mut reader = &frame[..];
            let header = codec.read_header(&mut reader).await.unwrap();
            assert_eq!(header.seq, 3);
            let text = codec.read_body(&mut reader, header.body_len as usize).await.unwrap();
            assert_eq!(text, body);
        }
    }

    #[tokio::test]
    async fn continuation_chunks_match_single_frame() {
        let codec = codec();
        let text = "DEAL_GET_PAGE|RETCODE=0 Done|\r\n[{\"Deal\":\"1\"},{\"Deal\":\"2\"}]";

        let single = codec.encode(text, 0, 0).unwrap();
        let chunked = codec.encode_chunked(text, 16).unwrap();
        assert!(chunked.len() > single.len());

        let from_single = codec.read_command(&mut &single[..]).await.unwrap();
        let from_chunks = codec.read_command(&mut &chunked[..]).await.unwrap();
        assert_eq!(from_single, from_chunks);
        assert_eq!(from_chunks.payload, "[{\"Deal\":\"1\"},{\"Deal\":\"2\"}]");
    }

    #[tokio::test]
    async fn odd_chunk_boundaries_split_code_units() {
        let codec = codec();
        let text = "X|RETCODE=0 Done|\r\n\u{1F4B0}\u{1F4B0}\u{1F4B0}";
        let chunked = codec.encode_chunked(text, 3).unwrap();
        let cmd = codec.read_command(&mut &chunked[..]).await.unwrap();
        assert_eq!(cmd.payload, "\u{1F4B0}\u{1F4B0}\u{1F4B0}");
    }

    #[tokio::test]
    async fn pings_between_chunks_are_skipped() {
        let codec = codec();
        let mut wire = Vec::new();
        wire.extend_from_slice(&codec.encode_ping());
        wire.extend_from_slice(&codec.encode("X|A=", 0, FLAG_CONTINUATION).unwrap());
        wire.extend_from_slice(&codec.encode_ping());
        wire.extend_from_slice(&codec.encode("1|\r\n", 1, FLAG_CONTINUATION).unwrap());
        wire.extend_from_slice(&codec.encode("tail", 2, 0).unwrap());

        let cmd = codec.read_command(&mut &wire[..]).await.unwrap();
        assert_eq!(cmd.name, "X");
        assert_eq!(cmd.get("A"), Some("1"));
        assert_eq!(cmd.payload, "tail");
    }

    #[tokio::test]
    async fn lone_ping_never_yields_a_command() {
        let codec = codec();
        let wire = codec.encode_ping();
        let err = codec.read_command(&mut &wire[..]).await.unwrap_err();
        match err {
            ReadError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_reads_are_looped() {
        let codec = codec();
        let text = "USER_GET|RETCODE=0 Done|\r\n{\"Login\":\"1001\"}";
        let wire = codec.encode_chunked(text, 10).unwrap();

        // A 3-byte pipe forces every read to come back short.
        let (mut tx, mut rx) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            tx.write_all(&wire).await.unwrap();
        });
        let cmd = codec.read_command(&mut rx).await.unwrap();
        writer.await.unwrap();
        assert_eq!(cmd.payload, "{\"Login\":\"1001\"}");
    }

    #[tokio::test]
    async fn bad_header_is_a_protocol_error() {
        let codec = codec();
        let wire = b"zz0000000";
        let err = codec.read_command(&mut &wire[..]).await.unwrap_err();
        assert!(matches!(err, ReadError::Protocol(ProtocolError::InvalidHeader { .. })));
    }

    #[test]
    fn decoder_waits_for_full_frame() {
        let codec = codec();
        let frame = codec.encode("QUIT|\r\n", 0, 0).unwrap();
        let mut decoder = FrameDecoder::new();

        let mut buf = BytesMut::from(&frame[..5]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&frame[5..frame.len() - 1]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&frame[frame.len() - 1..]);

        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(codec.decode_body(&decoded.body).unwrap(), "QUIT|\r\n");
    }

    #[test]
    fn decoder_splits_back_to_back_frames() {
        let codec = codec();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&codec.encode_ping());
        buf.extend_from_slice(&codec.encode("A|\r\n", 0, 0).unwrap());

        let mut decoder = FrameDecoder::new();
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(first.header.is_ping());
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(codec.decode_body(&second.body).unwrap(), "A|\r\n");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn reassembler_ignores_pings_mid_message() {
        let mut assembler = Reassembler::new();
        let cont = FrameHeader::new(2, 0, FLAG_CONTINUATION).unwrap();
        let last = FrameHeader::new(2, 1, 0).unwrap();
        assert_eq!(assembler.push(&cont, b"ab"), None);
        assert_eq!(assembler.push(&FrameHeader::ping(), b""), None);
        assert_eq!(assembler.pending_chunks(), 1);
        assert_eq!(assembler.push(&last, b"cd"), Some(b"abcd".to_vec()));
        assert_eq!(assembler.pending_chunks(), 0);
    }
}
