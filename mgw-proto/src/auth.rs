//! # Challenge-Response Authentication
//!
//! Purpose: Build the two handshake commands and compute the digest the
//! server expects in reply to its random challenge.
//!
//! ## Digest Chain
//!
//! ```text
//! secret = MD5( MD5( UTF16LE(password) ) || "WebAPI" )
//! answer = hex( MD5( secret || hex_decode(SRV_RAND) ) )
//! cli    = hex( MD5( 16 random bytes ) )
//! ```
//!
//! The password itself never leaves this module; only digests are sent.

use md5::{Digest, Md5};

use crate::codec::Utf16Codec;
use crate::command::{names, Command};
use crate::error::{ProtocolError, ProtocolResult};

/// Literal written once right after the TCP connect.
pub const PREAMBLE: &[u8; 9] = b"MT5WEBAPI";

/// Marker appended to the password digest.
pub const API_MARKER: &[u8] = b"WebAPI";

/// Value of `CRYPT_METHOD` meaning no transport encryption.
pub const CRYPT_METHOD_NONE: &str = "NONE";

/// Value of `TYPE` for manager logins.
pub const CLIENT_TYPE_MANAGER: &str = "MANAGER";

/// Challenge parameter in the `AUTH_START` reply.
pub const SRV_RAND: &str = "SRV_RAND";

/// Digest parameter in `AUTH_ANSWER`.
pub const SRV_RAND_ANSWER: &str = "SRV_RAND_ANSWER";

/// Client nonce parameter in `AUTH_ANSWER`.
pub const CLI_RAND: &str = "CLI_RAND";

/// Derives the intermediate secret from the password.
pub fn password_secret(codec: &Utf16Codec, password: &str) -> [u8; 16] {
    let first = Md5::digest(codec.encode(password));

    let mut hasher = Md5::new();
    hasher.update(&first[..]);
    hasher.update(API_MARKER);
    digest_bytes(hasher)
}

/// Computes `SRV_RAND_ANSWER` for a hex-encoded server challenge.
pub fn challenge_answer(codec: &Utf16Codec, password: &str, srv_rand_hex: &str) -> ProtocolResult<String> {
    let challenge = hex::decode(srv_rand_hex).map_err(|_| ProtocolError::InvalidHex { field: SRV_RAND })?;

    let mut hasher = Md5::new();
    hasher.update(password_secret(codec, password));
    hasher.update(&challenge);
    Ok(hex::encode(hasher.finalize()))
}

/// Checks an answer against the expected digest (accepting side).
pub fn verify_answer(codec: &Utf16Codec, password: &str, srv_rand_hex: &str, answer: &str) -> bool {
    match challenge_answer(codec, password, srv_rand_hex) {
        Ok(expected) => expected.eq_ignore_ascii_case(answer),
        Err(_) => false,
    }
}

/// Computes `CLI_RAND` from a 16-byte nonce.
pub fn client_rand(nonce: &[u8; 16]) -> String {
    hex::encode(Md5::digest(nonce))
}

/// Draws a fresh client nonce.
pub fn random_nonce() -> [u8; 16] {
    rand::random()
}

/// Builds `AUTH_START`.
pub fn auth_start(version: &str, agent: &str, login: &str) -> Command {
    Command::new(names::AUTH_START)
        .param("VERSION", version)
        .param("AGENT", agent)
        .param("LOGIN", login)
        .param("TYPE", CLIENT_TYPE_MANAGER)
        .param("CRYPT_METHOD", CRYPT_METHOD_NONE)
}

/// Builds `AUTH_ANSWER`.
pub fn auth_answer(srv_rand_answer: &str, cli_rand: &str) -> Command {
    Command::new(names::AUTH_ANSWER)
        .param(SRV_RAND_ANSWER, srv_rand_answer)
        .param(CLI_RAND, cli_rand)
}

fn digest_bytes(hasher: Md5) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}
