//! Request queues and the per-tick snapshots handed to listeners.

use std::sync::{Mutex, PoisonError};

use crate::types::Request;

/// Ordered collection of request handles.
///
/// Requests are exchanged in insertion order. The queue does not
/// deduplicate handles or detect overlapping offsets; callers own that.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    requests: Mutex<Vec<Request>>,
}

impl RequestQueue {
    pub(crate) fn add(&self, request: Request) {
        self.lock().push(request);
    }

    /// Removes every entry aliasing `request`. Returns whether any entry
    /// was removed.
    pub(crate) fn remove(&self, request: &Request) -> bool {
        let mut requests = self.lock();
        let before = requests.len();
        requests.retain(|r| !r.same_handle(request));
        requests.len() != before
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Point-in-time copy of the queue contents, in order.
    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot { requests: self.lock().clone() }
    }

    /// Snapshots and empties the queue in one locked step.
    pub(crate) fn drain(&self) -> QueueSnapshot {
        let mut requests = self.lock();
        QueueSnapshot { requests: std::mem::take(&mut *requests) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Request>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Immutable, ordered view of the requests covered by one exchange.
///
/// Listeners receive a snapshot, never the live queue, so mutating the
/// queue from inside a callback cannot disturb an in-flight dispatch.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    requests: Vec<Request>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }

    pub(crate) fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Concatenates two snapshots, preserving order.
    pub(crate) fn chain(mut self, other: QueueSnapshot) -> QueueSnapshot {
        self.requests.extend(other.requests);
        self
    }
}

impl<'a> IntoIterator for &'a QueueSnapshot {
    type Item = &'a Request;
    type IntoIter = std::slice::Iter<'a, Request>;

    fn into_iter(self) -> Self::IntoIter {
        self.requests.iter()
    }
}
