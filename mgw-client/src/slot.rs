//! # Result Slots
//!
//! Purpose: Carry a worker's outcome back to whoever submitted the call.
//!
//! ## Design Principles
//! 1. **Explicit Abandonment**: A slot whose reader is gone reports it; the
//!    worker checks instead of writing into a torn-down channel.
//! 2. **Never Fatal**: Delivering into an abandoned slot drops the response
//!    and returns `Delivery::Abandoned`; it cannot end the command loop.

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use mgw_proto::Command;

use crate::error::ClientResult;

/// Outcome of one call, tagged with the session that ran it.
#[derive(Debug)]
pub struct ClientResponse {
    /// The command as submitted.
    pub request: Command,
    /// Server reply, or the classified failure.
    pub result: ClientResult<Command>,
    /// Pool position of the executing session.
    pub session_id: usize,
}

impl ClientResponse {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Reply command, turning the failure into the error.
    pub fn into_result(self) -> ClientResult<Command> {
        self.result
    }

    /// Decodes the reply payload as JSON, or returns the call's failure.
    pub fn decode_payload<T: DeserializeOwned>(self) -> ClientResult<T> {
        let reply = self.result?;
        Ok(serde_json::from_str(&reply.payload)?)
    }
}

/// Where a worker puts the outcome of a call.
#[derive(Debug)]
pub enum ResultSlot {
    /// Single-use slot owned by one blocking caller.
    Private(oneshot::Sender<ClientResponse>),
    /// The pool's shared streaming sink.
    Shared(mpsc::Sender<ClientResponse>),
}

/// What happened to a delivered response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The reader was gone; the response was dropped.
    Abandoned,
}

impl ResultSlot {
    /// True once the reading side has gone away.
    pub fn is_abandoned(&self) -> bool {
        match self {
            ResultSlot::Private(tx) => tx.is_closed(),
            ResultSlot::Shared(tx) => tx.is_closed(),
        }
    }

    /// Hands `response` to the reader.
    ///
    /// A shared sink applies backpressure: this waits while the sink is full.
    pub async fn deliver(self, response: ClientResponse) -> Delivery {
        if self.is_abandoned() {
            return Delivery::Abandoned;
        }
        let sent = match self {
            ResultSlot::Private(tx) => tx.send(response).is_ok(),
            ResultSlot::Shared(tx) => tx.send(response).await.is_ok(),
        };
        if sent {
            Delivery::Delivered
        } else {
            Delivery::Abandoned
        }
    }
}
