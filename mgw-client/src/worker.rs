//! # Command Loop
//!
//! Purpose: Serialize every call bound for one session through a single task
//! so that exactly one request is in flight per connection.
//!
//! ## Design Principles
//! 1. **Actor Pattern**: The worker task is the only caller of
//!    `Session::send_request`; the inbound channel is its mailbox.
//! 2. **Near-Rendezvous Handoff**: The mailbox holds one request, so callers
//!    wait while the session is busy instead of queueing unbounded work.
//! 3. **Safe Delivery**: A missing reader never stops the loop.
//! 4. **Quit Is Terminal**: Only a `Quit` request (or every sender going away)
//!    ends the loop, after the session is shut down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

use mgw_proto::Command;

use crate::error::{ClientError, ClientResult};
use crate::metrics::PoolMetrics;
use crate::session::{spawn_keepalive, Session};
use crate::slot::{ClientResponse, Delivery, ResultSlot};

/// A command and where its outcome goes.
#[derive(Debug)]
pub struct CallRequest {
    pub command: Command,
    pub slot: ResultSlot,
}

/// Message accepted by a worker.
#[derive(Debug)]
pub enum Request {
    Call(CallRequest),
    /// Shut the session down and acknowledge.
    Quit(oneshot::Sender<ClientResult<()>>),
}

/// Handle to a running worker and its session.
pub struct WorkerHandle {
    session: Arc<Session>,
    tx: mpsc::Sender<Request>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Hands a call to the worker, waiting while it is busy.
    pub async fn enqueue(&self, request: CallRequest) -> ClientResult<()> {
        self.tx
            .send(Request::Call(request))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Asks the worker to shut its session down and waits for the ack.
    pub async fn quit(self) -> ClientResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Request::Quit(ack_tx)).await.is_err() {
            return Err(ClientError::Closed);
        }
        let outcome = ack_rx.await.map_err(|_| ClientError::Closed)?;
        join_loop(self.session.id(), self.task).await;
        outcome
    }
}

/// Waits for a command loop task; returns `false` if it panicked or was cancelled.
async fn join_loop(id: usize, task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(err) => {
            warn!(session = id, error = %err, "command loop ended abnormally");
            false
        }
    }
}

/// Starts the command loop and the keepalive timer for `session`.
pub fn spawn_worker(session: Arc<Session>, metrics: Arc<PoolMetrics>, idle_interval: Duration) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(1);
    let keepalive = spawn_keepalive(&session);
    let worker = Worker {
        session: session.clone(),
        metrics,
        idle_interval,
        keepalive,
    };
    let task = tokio::spawn(worker.run(rx));
    WorkerHandle { session, tx, task }
}

struct Worker {
    session: Arc<Session>,
    metrics: Arc<PoolMetrics>,
    idle_interval: Duration,
    keepalive: JoinHandle<()>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Request>) {
        let id = self.session.id();
        debug!(session = id, "command loop started");

        loop {
            let request = match time::timeout(self.idle_interval, rx.recv()).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!(session = id, "all senders gone, shutting down");
                    self.keepalive.abort();
                    let _ = self.session.shutdown().await;
                    break;
                }
                Err(_) => {
                    trace!(session = id, state = %self.session.state(), "idle heartbeat");
                    continue;
                }
            };

            match request {
                Request::Call(call) => self.execute(call).await,
                Request::Quit(ack) => {
                    self.keepalive.abort();
                    let outcome = self.session.shutdown().await;
                    let _ = ack.send(outcome);
                    info!(session = id, "command loop stopped");
                    break;
                }
            }
        }
    }

    /// Runs one call and delivers its outcome.
    ///
    /// **Logic**:
    /// 1. Exchange the command, even if the caller already gave up.
    /// 2. Map a non-success retcode to `Remote`.
    /// 3. Deliver; an abandoned slot only bumps a counter.
    /// 4. If the link went down, restore it before taking the next request.
    async fn execute(&self, call: CallRequest) {
        let CallRequest { command, slot } = call;
        let id = self.session.id();

        self.metrics.record_request_start();
        let started = Instant::now();
        let result = match self.session.send_request(&command).await {
            Ok(reply) if reply.is_success() => Ok(reply),
            Ok(reply) => {
                self.metrics.record_remote_error();
                Err(ClientError::Remote {
                    command: command.name.clone(),
                    retcode: reply.retcode().unwrap_or_default().to_string(),
                })
            }
            Err(err) => {
                if err.is_transport() {
                    self.metrics.record_transport_error();
                }
                Err(err)
            }
        };
        self.metrics.record_request_end(started.elapsed());

        let response = ClientResponse {
            request: command,
            result,
            session_id: id,
        };
        if slot.deliver(response).await == Delivery::Abandoned {
            debug!(session = id, "response dropped, caller gone");
            self.metrics.record_abandoned();
        }

        if !self.session.is_connected() {
            self.session.restore().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_reports_a_panicked_loop() {
        let clean = tokio::spawn(async {});
        assert!(join_loop(0, clean).await);

        let panicked = tokio::spawn(async { panic!("loop blew up") });
        assert!(!join_loop(1, panicked).await);
    }
}
