// mgw-proto - Wire format for the manager gateway protocol
//
// This crate defines the frame header, the UTF-16LE text codec, the textual
// command model and the challenge-response digest chain. It never opens a
// socket; readers and writers are supplied by the caller.

pub mod auth;
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;

// Re-export for convenience
pub use codec::Utf16Codec;
pub use command::{names, Command, Params, RETCODE, RETCODE_SUCCESS};
pub use error::{ProtocolError, ProtocolResult, ReadError};
pub use frame::{
    Frame, FrameCodec, FrameDecoder, FrameHeader, Reassembler, FLAG_CONTINUATION, HEADER_LEN,
    MAX_BODY_LEN, MAX_FLAG,
};
