//! The continual processing loop.
//!
//! One tokio task runs the whole loop, so ticks are sequential by
//! construction and can never overlap. An overrunning tick starts the
//! next one immediately; it is never skipped or double-scheduled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::client::{ClientShared, ProcessingResult};
use crate::listener::FailReason;

/// Lifecycle of the continual processing loop, readable from any
/// thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// No loop is running.
    Idle,
    /// The loop is ticking.
    Running,
    /// A stop was requested; the loop will exit after the current tick.
    Cancelling,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLING: u8 = 2;

/// Atomic cell holding the loop state.
#[derive(Debug, Default)]
pub(crate) struct SchedulerFlag(AtomicU8);

impl SchedulerFlag {
    pub(crate) fn state(&self) -> SchedulerState {
        match self.0.load(Ordering::SeqCst) {
            RUNNING => SchedulerState::Running,
            CANCELLING => SchedulerState::Cancelling,
            _ => SchedulerState::Idle,
        }
    }

    /// Idle -> Running; `false` if a loop already holds the flag.
    pub(crate) fn try_start(&self) -> bool {
        self.0.compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Running -> Cancelling; a no-op from any other state.
    pub(crate) fn request_cancel(&self) {
        let _ = self.0.compare_exchange(RUNNING, CANCELLING, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.0.store(IDLE, Ordering::SeqCst);
    }
}

/// Body of the continual processing task.
///
/// Each tick snapshots both queues, exchanges the batch, and on success
/// fires `on_process` synchronously before the next tick is scheduled.
/// A non-Ok exchange reports `on_fail` and ends the loop; the caller
/// re-arms explicitly. Cancellation is honored at every await point and
/// checked again between ticks.
pub(crate) async fn run(
    shared: Arc<ClientShared>,
    period: Duration,
    run_immediately: bool,
    token: CancellationToken,
) {
    info!(period_ms = period.as_millis() as u64, run_immediately, "continual processing started");

    if !run_immediately {
        tokio::select! {
            _ = token.cancelled() => {
                shared.scheduler_flag.finish();
                info!("continual processing stopped before first tick");
                return;
            }
            _ = tokio::time::sleep(period) => {}
        }
    }

    loop {
        if token.is_cancelled() || !shared.is_connected() {
            break;
        }

        let started = Instant::now();
        let (outcome, snapshot) = shared.exchange_cycle();
        match outcome {
            ProcessingResult::Ok => {
                if shared.is_connected() {
                    shared.publish_snapshot(snapshot.clone());
                    shared.listeners.notify_process(&snapshot);
                }
            }
            ProcessingResult::QueueEmpty => {
                // Queue cleared between ticks; nothing to exchange, keep
                // the cadence.
                trace!("tick found empty queues");
            }
            ProcessingResult::StoreFailed | ProcessingResult::ExchangeFailed => {
                let result = shared.last_result();
                debug!(?result, "continual processing halting on failed exchange");
                shared.listeners.notify_fail(FailReason::Transport(result));
                break;
            }
        }

        let wait = period.saturating_sub(started.elapsed());
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    shared.scheduler_flag.finish();
    info!("continual processing stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_transitions() {
        let flag = SchedulerFlag::default();
        assert_eq!(flag.state(), SchedulerState::Idle);

        assert!(flag.try_start());
        assert_eq!(flag.state(), SchedulerState::Running);
        assert!(!flag.try_start());

        flag.request_cancel();
        assert_eq!(flag.state(), SchedulerState::Cancelling);
        // Cancelling twice stays Cancelling.
        flag.request_cancel();
        assert_eq!(flag.state(), SchedulerState::Cancelling);

        flag.finish();
        assert_eq!(flag.state(), SchedulerState::Idle);
        assert!(flag.try_start());
    }

    #[test]
    fn cancel_before_start_is_a_no_op() {
        let flag = SchedulerFlag::default();
        flag.request_cancel();
        assert_eq!(flag.state(), SchedulerState::Idle);
    }
}
