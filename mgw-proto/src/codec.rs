//! # UTF-16LE Text Codec
//!
//! Purpose: Convert between Rust strings and the little-endian UTF-16 bytes
//! carried in every frame body.
//!
//! ## Design Principles
//! 1. **Stateless Value**: `Utf16Codec` is a zero-sized `Copy` type, handed to
//!    whoever needs it instead of living in a process-wide global.
//! 2. **No BOM**: Bodies never carry a byte-order mark; a leading U+FEFF is
//!    treated as ordinary text.
//! 3. **Fail Fast**: Odd byte counts and unpaired surrogates are rejected.

use crate::error::{ProtocolError, ProtocolResult};

/// Stateless UTF-16 little-endian encoder/decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Utf16Codec;

impl Utf16Codec {
    /// Creates a codec value.
    pub const fn new() -> Self {
        Utf16Codec
    }

    /// Encodes `text` as UTF-16LE without a byte-order mark.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() * 2);
        self.encode_into(text, &mut out);
        out
    }

    /// Appends the UTF-16LE encoding of `text` to `out`.
    pub fn encode_into(&self, text: &str, out: &mut Vec<u8>) {
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
    }

    /// Returns the number of bytes `encode` would produce.
    pub fn encoded_len(&self, text: &str) -> usize {
        text.encode_utf16().count() * 2
    }

    /// Decodes UTF-16LE bytes into a `String`.
    pub fn decode(&self, bytes: &[u8]) -> ProtocolResult<String> {
        if bytes.len() % 2 != 0 {
            return Err(ProtocolError::InvalidUtf16);
        }
        let units = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
        char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map_err(|_| ProtocolError::InvalidUtf16)
    }
}
