//! # Session Pool
//!
//! Purpose: Own a fixed set of sessions, route each call to the next one in
//! strict rotation, and hand results back through private slots or a shared
//! streaming sink.
//!
//! ## Design Principles
//! 1. **All Or Nothing**: `connect` returns only once every session is ready;
//!    a single failure tears down what was built.
//! 2. **Lock-Free Rotation**: The cursor advances by exactly one per dispatch
//!    with an atomic read-modify-write.
//! 3. **Advisory Timeouts**: A caller that stops waiting abandons its slot;
//!    the session still finishes the round trip.
//! 4. **Ordered Shutdown**: Sessions are quit one at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{info, warn};

use mgw_proto::Command;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics::{PoolMetrics, PoolMetricsSnapshot};
use crate::session::{Session, SessionState};
use crate::slot::{ClientResponse, ResultSlot};
use crate::worker::{spawn_worker, CallRequest, WorkerHandle};

/// Fixed-size pool of authenticated sessions.
pub struct Pool {
    config: Arc<ClientConfig>,
    workers: Vec<WorkerHandle>,
    cursor: AtomicUsize,
    sink_tx: mpsc::Sender<ClientResponse>,
    sink_rx: Mutex<Option<mpsc::Receiver<ClientResponse>>>,
    metrics: Arc<PoolMetrics>,
}

impl Pool {
    /// Opens `pool_size` sessions one after another.
    ///
    /// **Logic**:
    /// 1. Validate the configuration.
    /// 2. Open each session; start its worker once it is ready.
    /// 3. On the first failure, quit the workers already started and return
    ///    the error. No partially-ready pool is ever returned.
    pub async fn connect(config: ClientConfig) -> ClientResult<Pool> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(PoolMetrics::new());
        let size = config.pool_size;

        let mut workers: Vec<WorkerHandle> = Vec::with_capacity(size);
        for id in 0..size {
            match Session::open(id, config.clone(), metrics.clone()).await {
                Ok(session) => {
                    workers.push(spawn_worker(session, metrics.clone(), config.idle_interval));
                }
                Err(err) => {
                    warn!(session = id, error = %err, "pool construction failed");
                    for worker in workers {
                        let _ = worker.quit().await;
                    }
                    return Err(err);
                }
            }
        }

        let (sink_tx, sink_rx) = mpsc::channel(size);
        info!(size, addr = %config.addr(), "pool ready");
        Ok(Pool {
            config,
            workers,
            cursor: AtomicUsize::new(0),
            sink_tx,
            sink_rx: Mutex::new(Some(sink_rx)),
            metrics,
        })
    }

    /// Number of sessions.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the current cursor and advances it by one, modulo the size.
    fn next_index(&self) -> usize {
        let size = self.workers.len();
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| Some((cur + 1) % size))
        {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Blocking call with the configured `request_timeout`.
    pub async fn call(&self, command: Command) -> ClientResult<ClientResponse> {
        self.call_with_timeout(command, self.config.request_timeout).await
    }

    /// Blocking call with an explicit wait limit.
    ///
    /// The limit covers only the wait for the result; the handoff to a busy
    /// session is not counted. On expiry the slot is abandoned and the session
    /// completes the round trip on its own.
    pub async fn call_with_timeout(&self, command: Command, timeout: Duration) -> ClientResult<ClientResponse> {
        let (tx, rx) = oneshot::channel();
        let worker = &self.workers[self.next_index()];
        worker
            .enqueue(CallRequest {
                command,
                slot: ResultSlot::Private(tx),
            })
            .await?;

        match time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.metrics.record_timeout();
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Blocking call returning the reply or the failure, untagged.
    pub async fn call_checked(&self, command: Command) -> ClientResult<Command> {
        self.call(command).await?.into_result()
    }

    /// Streaming call: the outcome goes to the shared sink.
    ///
    /// Returns the id of the session the call was routed to; matching the
    /// eventual response to this call is up to the consumer.
    pub async fn submit(&self, command: Command) -> ClientResult<usize> {
        let index = self.next_index();
        self.workers[index]
            .enqueue(CallRequest {
                command,
                slot: ResultSlot::Shared(self.sink_tx.clone()),
            })
            .await?;
        Ok(index)
    }

    /// Takes the receiving end of the shared sink.
    ///
    /// Returns `None` after the first call. The sink holds `pool_size`
    /// responses; workers wait while it is full.
    pub fn take_responses(&self) -> Option<mpsc::Receiver<ClientResponse>> {
        self.sink_rx.lock().expect("pool mutex poisoned").take()
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// State of every session, by pool position.
    pub fn session_states(&self) -> Vec<SessionState> {
        self.workers.iter().map(|w| w.session().state()).collect()
    }

    /// Quits every session in order, waiting for each acknowledgment.
    ///
    /// **Logic**:
    /// 1. Drop the sink receiver if nobody took it, so workers blocked on a
    ///    full sink see their deliveries abandoned.
    /// 2. Mark every session closing, which ends any reconnect loop.
    /// 3. Quit the workers one at a time. All are quit even if one fails; the
    ///    first error is returned.
    pub async fn close(self) -> ClientResult<()> {
        let untaken = self.sink_rx.lock().expect("pool mutex poisoned").take();
        drop(untaken);
        for worker in &self.workers {
            worker.session().begin_close();
        }

        let mut first_err = None;
        for worker in self.workers {
            let id = worker.session().id();
            if let Err(err) = worker.quit().await {
                warn!(session = id, error = %err, "session quit reported an error");
                first_err.get_or_insert(err);
            }
        }
        info!("pool closed");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
