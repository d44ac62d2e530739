//! # Command Model
//!
//! Purpose: Represent one protocol command (name, parameters, trailing
//! payload) and convert it to and from the text line format.
//!
//! ## Design Principles
//! 1. **Lenient Parsing**: Malformed parameter tokens are dropped, not fatal;
//!    servers are known to emit stray separators.
//! 2. **Stable Ordering**: Parameters keep insertion order on the wire so
//!    handshake commands go out in the documented field order.
//! 3. **Opaque Payload**: Everything after the first CRLF is carried verbatim.
//!
//! ## Text Format
//!
//! ```text
//! NAME|KEY=VALUE|KEY=VALUE|\r\nPAYLOAD
//! ```

use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// Separator between the header line and the payload.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Separator between header tokens.
pub const TOKEN_SEPARATOR: char = '|';

/// Separator between a parameter key and its value.
pub const PARAM_SEPARATOR: char = '=';

/// Parameter carrying the status of every business response.
pub const RETCODE: &str = "RETCODE";

/// Literal retcode value meaning success.
pub const RETCODE_SUCCESS: &str = "0 Done";

/// Command names used by the client.
pub mod names {
    pub const AUTH_START: &str = "AUTH_START";
    pub const AUTH_ANSWER: &str = "AUTH_ANSWER";
    pub const QUIT: &str = "QUIT";

    pub const ORDER_GET_TOTAL: &str = "ORDER_GET_TOTAL";
    pub const ORDER_GET_PAGE: &str = "ORDER_GET_PAGE";
    pub const ORDER_GET_BATCH: &str = "ORDER_GET_BATCH";
    pub const HISTORY_GET_TOTAL: &str = "HISTORY_GET_TOTAL";
    pub const DEAL_GET_TOTAL: &str = "DEAL_GET_TOTAL";
    pub const DEAL_GET_PAGE: &str = "DEAL_GET_PAGE";
    pub const DEAL_GET_BATCH: &str = "DEAL_GET_BATCH";
    pub const DEAL_DELETE: &str = "DEAL_DELETE";
    pub const POSITION_GET_TOTAL: &str = "POSITION_GET_TOTAL";
    pub const POSITION_GET_BATCH: &str = "POSITION_GET_BATCH";
    pub const POSITION_DELETE: &str = "POSITION_DELETE";
    pub const CLIENT_IDS: &str = "CLIENT_IDS";
    pub const USER_GET: &str = "USER_GET";
    pub const USER_GET_BATCH: &str = "USER_GET_BATCH";
    pub const USER_DELETE: &str = "USER_DELETE";
    pub const TRADE_BALANCE: &str = "TRADE_BALANCE";
}

/// Insertion-ordered parameter set with unique keys.
///
/// Equality ignores order: two sets are equal when they hold the same
/// key/value pairs.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Params {
            entries: Vec::new(),
        }
    }

    /// Inserts or replaces a parameter, returning the previous value.
    ///
    /// Replacing keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Looks up a parameter by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Removes a parameter, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for Params {}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// One protocol command or response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// Command token, e.g. `DEAL_GET_TOTAL`.
    pub name: String,
    /// Header-line parameters.
    pub params: Params,
    /// Raw text after the header line (commonly JSON).
    pub payload: String,
}

impl Command {
    /// Creates a command with no parameters and an empty payload.
    pub fn new(name: impl Into<String>) -> Self {
        Command {
            name: name.into(),
            params: Params::new(),
            payload: String::new(),
        }
    }

    /// Adds a parameter (builder style).
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Sets the trailing payload (builder style).
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Looks up a parameter by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    /// Returns the `RETCODE` parameter if present.
    pub fn retcode(&self) -> Option<&str> {
        self.get(RETCODE)
    }

    /// True when `RETCODE` equals the success sentinel.
    pub fn is_success(&self) -> bool {
        self.retcode() == Some(RETCODE_SUCCESS)
    }

    /// Serializes the command to its wire text.
    ///
    /// Parameters with empty values are omitted.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 16 * self.params.len() + self.payload.len() + 4);
        out.push_str(&self.name);
        out.push(TOKEN_SEPARATOR);
        for (key, value) in self.params.iter() {
            if value.is_empty() {
                continue;
            }
            out.push_str(key);
            out.push(PARAM_SEPARATOR);
            out.push_str(value);
            out.push(TOKEN_SEPARATOR);
        }
        out.push_str(LINE_TERMINATOR);
        out.push_str(&self.payload);
        out
    }

    /// Parses wire text into a command.
    ///
    /// **Input**: decoded body text.
    /// **Output**: the command, or `MissingLineTerminator` when no CRLF exists.
    ///
    /// **Logic**:
    /// 1. Split at the first CRLF; the rest is payload, untouched.
    /// 2. Split the header line on `|`; the first token is the name.
    /// 3. Split each later non-empty token on its first `=`; drop tokens without one.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let (line, payload) = text
            .split_once(LINE_TERMINATOR)
            .ok_or(ProtocolError::MissingLineTerminator)?;

        let mut tokens = line.split(TOKEN_SEPARATOR);
        let name = tokens.next().unwrap_or_default().to_string();

        let mut params = Params::new();
        for token in tokens.filter(|t| !t.is_empty()) {
            if let Some((key, value)) = token.split_once(PARAM_SEPARATOR) {
                params.insert(key, value);
            }
        }

        Ok(Command {
            name,
            params,
            payload: payload.to_string(),
        })
    }
}

// Header line only; payloads can be large and are logged separately.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in self.params.iter() {
            write!(f, "|{}={}", key, value)?;
        }
        Ok(())
    }
}
