// mgw-mock - Scripted manager server for tests and local development
//
// Speaks the same preamble, framing and challenge-response handshake as a
// real manager endpoint. Business commands are answered by a caller-supplied
// handler that returns a `Reply`.

mod server;

pub use server::{Handler, LoggedCommand, MockConfig, MockServer, Reply};
