//! Listener callbacks for connection and processing events.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::queue::QueueSnapshot;
use crate::transport::IpcResult;

/// Why a processing cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailReason {
    /// The batch exchange came back with a non-Ok result.
    Transport(IpcResult),
    /// A listener callback panicked during dispatch.
    Callback,
}

/// Event callbacks fired by the client and the processing loop.
///
/// All methods default to no-ops so implementors override only what
/// they need. Callbacks run on whichever thread produced the event;
/// re-marshaling to a UI context is the implementor's responsibility.
#[allow(unused_variables)]
pub trait SimListener: Send + Sync {
    /// A connection to the simulator was established.
    fn on_connected(&self) {}

    /// The connection was lost or deliberately closed.
    fn on_disconnected(&self) {}

    /// One batch exchange completed; `snapshot` holds the requests it
    /// covered, buffers already updated.
    fn on_process(&self, snapshot: &QueueSnapshot) {}

    /// A processing cycle failed.
    fn on_fail(&self, reason: FailReason) {}
}

/// Ordered set of listeners, deduplicated by `Arc` identity.
///
/// Dispatch walks a point-in-time copy of the set, so adding or
/// removing a listener from inside a callback takes effect from the
/// next dispatch cycle, never the current one.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn SimListener>>>,
}

impl ListenerRegistry {
    /// Registers a listener; returns `false` if this exact `Arc` is
    /// already registered.
    pub(crate) fn add(&self, listener: Arc<dyn SimListener>) -> bool {
        let mut listeners = self.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Removes a listener by identity; returns whether it was present.
    pub(crate) fn remove(&self, listener: &Arc<dyn SimListener>) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub(crate) fn notify_connected(&self) {
        self.dispatch(|l| l.on_connected());
    }

    pub(crate) fn notify_disconnected(&self) {
        self.dispatch(|l| l.on_disconnected());
    }

    /// Dispatches `on_process`; if any callback panics, the panic is
    /// contained and reported to every listener as a callback failure.
    pub(crate) fn notify_process(&self, snapshot: &QueueSnapshot) {
        let panics = self.dispatch(|l| l.on_process(snapshot));
        if panics > 0 {
            self.notify_fail(FailReason::Callback);
        }
    }

    pub(crate) fn notify_fail(&self, reason: FailReason) {
        self.dispatch(|l| l.on_fail(reason));
    }

    /// Runs `f` over a copy of the set in registration order, containing
    /// panics. Returns how many callbacks panicked.
    fn dispatch(&self, f: impl Fn(&dyn SimListener)) -> usize {
        let snapshot: Vec<_> = self.lock().clone();
        let mut panics = 0;
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                warn!("listener callback panicked");
                panics += 1;
            }
        }
        panics
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn SimListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        processed: AtomicUsize,
        failures: Mutex<Vec<FailReason>>,
    }

    impl SimListener for Recorder {
        fn on_process(&self, _snapshot: &QueueSnapshot) {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_fail(&self, reason: FailReason) {
            self.failures.lock().unwrap().push(reason);
        }
    }

    struct Panicker;

    impl SimListener for Panicker {
        fn on_process(&self, _snapshot: &QueueSnapshot) {
            panic!("listener bug");
        }
    }

    #[test]
    fn same_arc_registers_only_once() {
        let registry = ListenerRegistry::default();
        let listener: Arc<dyn SimListener> = Arc::new(Recorder::default());

        assert!(registry.add(Arc::clone(&listener)));
        assert!(!registry.add(Arc::clone(&listener)));

        // A second instance of the same type is a different listener.
        let other: Arc<dyn SimListener> = Arc::new(Recorder::default());
        assert!(registry.add(other));
    }

    #[test]
    fn removed_listener_stops_receiving_events() {
        let registry = ListenerRegistry::default();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn SimListener> = recorder.clone();

        registry.add(Arc::clone(&listener));
        registry.notify_process(&QueueSnapshot::default());
        assert!(registry.remove(&listener));
        registry.notify_process(&QueueSnapshot::default());

        assert_eq!(recorder.processed.load(Ordering::SeqCst), 1);
        assert!(!registry.remove(&listener));
    }

    #[test]
    fn panicking_callback_is_contained_and_reported() {
        let registry = ListenerRegistry::default();
        let recorder = Arc::new(Recorder::default());
        registry.add(Arc::new(Panicker));
        registry.add(recorder.clone());

        registry.notify_process(&QueueSnapshot::default());

        // The listener after the panicker still ran, and everyone heard
        // about the callback failure.
        assert_eq!(recorder.processed.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.failures.lock().unwrap(), vec![FailReason::Callback]);
    }

    #[test]
    fn dispatch_runs_in_registration_order() {
        struct Ordered(usize, Arc<Mutex<Vec<usize>>>);
        impl SimListener for Ordered {
            fn on_process(&self, _snapshot: &QueueSnapshot) {
                self.1.lock().unwrap().push(self.0);
            }
        }

        let registry = ListenerRegistry::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            registry.add(Arc::new(Ordered(i, order.clone())));
        }

        registry.notify_process(&QueueSnapshot::default());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
