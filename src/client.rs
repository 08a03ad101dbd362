//! Connection manager over an injected transport.
//!
//! [`SimClient`] owns the connection state machine, both request
//! queues, the listener registry and the two background tasks (the
//! continual-processing loop and the wait-for-connection poller). It is
//! constructed explicitly over a [`Transport`]; there is no global
//! instance.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::{LinkError, Result};
use crate::listener::{FailReason, ListenerRegistry, SimListener};
use crate::queue::{QueueSnapshot, RequestQueue};
use crate::scheduler::{self, SchedulerFlag, SchedulerState};
use crate::transport::{IpcResult, SimTarget, Transport};
use crate::types::Request;

/// Connection lifecycle state, owned exclusively by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome of one batch exchange.
///
/// A failed exchange is local to that call; it never invalidates a
/// queue or the client itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingResult {
    /// The batch was exchanged successfully.
    Ok,
    /// Both queues were empty; the transport was not called.
    QueueEmpty,
    /// The channel refused to accumulate the batch.
    StoreFailed,
    /// The round trip itself failed.
    ExchangeFailed,
}

impl ProcessingResult {
    /// Numeric code from the legacy protocol, for interop with tooling
    /// that still speaks it.
    pub const fn code(&self) -> u16 {
        match self {
            ProcessingResult::Ok => 500,
            ProcessingResult::QueueEmpty => 512,
            ProcessingResult::StoreFailed => 513,
            ProcessingResult::ExchangeFailed => 514,
        }
    }
}

pub(crate) struct ClientShared {
    transport: Mutex<Box<dyn Transport>>,
    state: Mutex<ConnectionState>,
    pub(crate) listeners: ListenerRegistry,
    one_time: RequestQueue,
    continual: RequestQueue,
    last_result: Mutex<IpcResult>,
    last_duration: Mutex<Duration>,
    pub(crate) scheduler_flag: SchedulerFlag,
    scheduler_cancel: Mutex<Option<CancellationToken>>,
    waiter_cancel: Mutex<Option<CancellationToken>>,
    snapshot_tx: watch::Sender<Arc<QueueSnapshot>>,
}

impl ClientShared {
    pub(crate) fn is_connected(&self) -> bool {
        *lock(&self.state) == ConnectionState::Connected
    }

    pub(crate) fn last_result(&self) -> IpcResult {
        *lock(&self.last_result)
    }

    /// One full exchange attempt: drain the one-time queue, snapshot the
    /// continual queue, run the batch, record result and duration.
    ///
    /// The one-time queue is emptied whether or not the exchange
    /// succeeds; a failed one-shot is spent, not retried.
    pub(crate) fn exchange_cycle(&self) -> (ProcessingResult, QueueSnapshot) {
        let batch = self.one_time.drain().chain(self.continual.snapshot());
        if batch.is_empty() {
            return (ProcessingResult::QueueEmpty, batch);
        }

        let started = Instant::now();
        let result = lock(&self.transport).exchange(batch.requests());
        let elapsed = started.elapsed();
        *lock(&self.last_result) = result;
        *lock(&self.last_duration) = elapsed;
        trace!(
            requests = batch.len(),
            ?result,
            elapsed_us = elapsed.as_micros() as u64,
            "exchange cycle"
        );

        if result.is_connection_loss() {
            debug!(?result, "exchange reported connection loss");
            self.mark_disconnected();
        }

        let outcome = match result {
            IpcResult::Ok => ProcessingResult::Ok,
            IpcResult::BufferFull | IpcResult::NoData => ProcessingResult::StoreFailed,
            _ => ProcessingResult::ExchangeFailed,
        };
        (outcome, batch)
    }

    /// Publishes a completed tick's snapshot to the watch channel.
    pub(crate) fn publish_snapshot(&self, snapshot: QueueSnapshot) {
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }

    /// Flips to `Disconnected`, firing `on_disconnected` only when the
    /// prior state was `Connected`, and asks the scheduler to stop.
    fn mark_disconnected(&self) {
        let was_connected = {
            let mut state = lock(&self.state);
            let was = *state == ConnectionState::Connected;
            *state = ConnectionState::Disconnected;
            was
        };
        if let Some(token) = lock(&self.scheduler_cancel).as_ref() {
            self.scheduler_flag.request_cancel();
            token.cancel();
        }
        if was_connected {
            info!("disconnected from simulator");
            self.listeners.notify_disconnected();
        }
    }

    /// One synchronous connection attempt against `target`.
    ///
    /// The transport lock is held across the state check, the open call
    /// and the resulting transition, so two concurrent attempts cannot
    /// interleave: the loser observes `Connected` and gets the
    /// already-open result instead of opening a second session.
    fn try_connect(&self, target: SimTarget) -> Result<u32> {
        let session = {
            let mut transport = lock(&self.transport);
            {
                let mut state = lock(&self.state);
                if *state == ConnectionState::Connected {
                    return Err(LinkError::transport(IpcResult::AlreadyOpen));
                }
                *state = ConnectionState::Connecting;
            }

            match transport.open(target) {
                Ok(0) => {
                    *lock(&self.state) = ConnectionState::Disconnected;
                    trace!(%target, "simulator not found");
                    return Ok(0);
                }
                Ok(session) => {
                    *lock(&self.state) = ConnectionState::Connected;
                    session
                }
                Err(e) => {
                    *lock(&self.state) = ConnectionState::Disconnected;
                    return Err(e);
                }
            }
        };

        // Listeners run outside the transport lock so a callback is free
        // to process requests.
        if let Some(token) = lock(&self.waiter_cancel).take() {
            token.cancel();
        }
        info!(%target, session, "connected to simulator");
        self.listeners.notify_connected();
        Ok(session)
    }
}

/// Client over one simulator connection.
///
/// All methods take `&self`; wrap the client in an [`Arc`] to drive it
/// from listeners or other tasks.
pub struct SimClient {
    shared: Arc<ClientShared>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    waiter_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimClient {
    /// Builds a client over `transport`. The client starts
    /// `Disconnected` with empty queues.
    pub fn new(transport: impl Transport + 'static) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(QueueSnapshot::default()));
        SimClient {
            shared: Arc::new(ClientShared {
                transport: Mutex::new(Box::new(transport)),
                state: Mutex::new(ConnectionState::Disconnected),
                listeners: ListenerRegistry::default(),
                one_time: RequestQueue::default(),
                continual: RequestQueue::default(),
                last_result: Mutex::new(IpcResult::Ok),
                last_duration: Mutex::new(Duration::ZERO),
                scheduler_flag: SchedulerFlag::default(),
                scheduler_cancel: Mutex::new(None),
                waiter_cancel: Mutex::new(None),
                snapshot_tx,
            }),
            scheduler_task: Mutex::new(None),
            waiter_task: Mutex::new(None),
        }
    }

    /// One synchronous connection attempt.
    ///
    /// `Ok(0)` means the target was not found right now; the state stays
    /// `Disconnected` and nothing is reported to listeners. A nonzero
    /// session id means `Connected`, `on_connected` has fired, and any
    /// running wait-for-connection poller has been cancelled.
    pub fn connect(&self, target: SimTarget) -> Result<u32> {
        self.shared.try_connect(target)
    }

    /// Tears the connection down and stops all background work.
    ///
    /// Idempotent and legal from any state. Both background tasks are
    /// awaited to a full stop, so no stale tick can interleave with a
    /// later `connect`. `on_disconnected` fires only if the client was
    /// actually connected.
    pub async fn disconnect(&self) {
        if let Some(token) = lock(&self.shared.scheduler_cancel).take() {
            self.shared.scheduler_flag.request_cancel();
            token.cancel();
        }
        if let Some(token) = lock(&self.shared.waiter_cancel).take() {
            token.cancel();
        }
        let scheduler = lock(&self.scheduler_task).take();
        let waiter = lock(&self.waiter_task).take();
        if let Some(handle) = scheduler {
            let _ = handle.await;
        }
        if let Some(handle) = waiter {
            let _ = handle.await;
        }

        lock(&self.shared.transport).close();
        self.shared.mark_disconnected();
    }

    /// Spawns a poller that retries `connect` every `poll_interval`
    /// until the target appears or [`disconnect`] cancels it.
    ///
    /// The first attempt runs immediately. An absent target is the quiet
    /// sentinel and the loop just keeps polling; a protocol-level
    /// failure is reported through `on_fail` but is never fatal to the
    /// loop. Success fires `on_connected` from the poller task. When the
    /// client is already connected the goal state is met and no poller
    /// is spawned.
    ///
    /// [`disconnect`]: SimClient::disconnect
    pub fn wait_for_connection(&self, target: SimTarget, poll_interval: Duration) {
        if self.shared.is_connected() {
            return;
        }
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.shared.waiter_cancel).replace(token.clone()) {
            previous.cancel();
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            debug!(
                %target,
                interval_ms = poll_interval.as_millis() as u64,
                "waiting for simulator"
            );
            loop {
                match shared.try_connect(target) {
                    Ok(session) if session != 0 => break,
                    // Not found yet; keep polling quietly.
                    Ok(_) => {}
                    // Someone else connected in the meantime; the goal
                    // state is met.
                    Err(LinkError::Transport { result: IpcResult::AlreadyOpen }) => break,
                    Err(LinkError::Transport { result }) => {
                        shared.listeners.notify_fail(FailReason::Transport(result));
                    }
                    Err(e) => {
                        debug!(error = %e, "connection attempt failed");
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("wait for connection cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        });
        if let Some(previous) = lock(&self.waiter_task).replace(handle) {
            previous.abort();
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Result of the most recent transport exchange.
    pub fn last_result(&self) -> IpcResult {
        self.shared.last_result()
    }

    /// Wall time of the most recent transport exchange.
    pub fn last_processing_time(&self) -> Duration {
        *lock(&self.shared.last_duration)
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.shared.scheduler_flag.state()
    }

    pub fn add_listener(&self, listener: Arc<dyn SimListener>) -> bool {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SimListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    /// Queues a request for the next exchange only. The queue is drained
    /// after that exchange whether or not it succeeded.
    pub fn add_one_time_request(&self, request: Request) {
        self.shared.one_time.add(request);
    }

    /// Queues a request for every subsequent exchange until removed.
    pub fn add_continual_request(&self, request: Request) {
        self.shared.continual.add(request);
    }

    /// Removes a continual request by handle identity.
    pub fn remove_continual_request(&self, request: &Request) -> bool {
        self.shared.continual.remove(request)
    }

    pub fn continual_request_count(&self) -> usize {
        self.shared.continual.len()
    }

    /// Empties the continual queue and asks a running processing loop to
    /// stop, since its batch no longer exists.
    pub fn clear_continual_requests(&self) {
        self.cancel_processing();
        self.shared.continual.clear();
    }

    /// Runs one exchange on the caller's thread.
    ///
    /// Covers the one-time queue (drained afterwards, success or not)
    /// and the continual queue. On `Ok`, listeners get `on_process` and
    /// the snapshot stream a new item, synchronously. A failed exchange
    /// is reported only through the returned [`ProcessingResult`].
    pub fn process_once(&self) -> Result<ProcessingResult> {
        if !self.shared.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let (outcome, snapshot) = self.shared.exchange_cycle();
        if outcome == ProcessingResult::Ok && self.shared.is_connected() {
            self.shared.publish_snapshot(snapshot.clone());
            self.shared.listeners.notify_process(&snapshot);
        }
        Ok(outcome)
    }

    /// Starts the continual processing loop at `period`.
    ///
    /// Refuses when not connected, when the continual queue is empty, or
    /// when a loop is already running. With `run_immediately` false the
    /// first tick waits one full period.
    pub fn start_processing(&self, period: Duration, run_immediately: bool) -> Result<()> {
        if !self.shared.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if self.shared.continual.is_empty() {
            return Err(LinkError::NothingToProcess);
        }
        if !self.shared.scheduler_flag.try_start() {
            return Err(LinkError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        *lock(&self.shared.scheduler_cancel) = Some(token.clone());
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(scheduler::run(shared, period, run_immediately, token));
        *lock(&self.scheduler_task) = Some(handle);
        Ok(())
    }

    /// Requests a graceful stop of the processing loop after the current
    /// tick. Idempotent, callable from any thread including inside
    /// `on_process`.
    pub fn cancel_processing(&self) {
        if let Some(token) = lock(&self.shared.scheduler_cancel).as_ref() {
            self.shared.scheduler_flag.request_cancel();
            token.cancel();
        }
    }

    /// Stream of per-tick queue snapshots, one item per completed
    /// exchange. Each subscriber sees ticks published after it
    /// subscribed.
    pub fn updates(&self) -> impl Stream<Item = Arc<QueueSnapshot>> + Send + Unpin + use<> {
        WatchStream::from_changes(self.shared.snapshot_tx.subscribe())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
