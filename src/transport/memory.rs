//! In-process transport backed by a plain byte region.
//!
//! Stands in for the real IPC channel on any platform: same surface,
//! same sentinel and result-table behavior, with knobs for tests to
//! script the simulator appearing, disappearing and failing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::Result;
use crate::transport::{IpcResult, SimTarget, Transport};
use crate::types::{Direction, Request};

const DEFAULT_REGION_SIZE: usize = 0x1_0000;

#[derive(Debug)]
struct MemoryState {
    data: Vec<u8>,
    present: Option<SimTarget>,
    open: bool,
    next_session: u32,
    scripted: VecDeque<IpcResult>,
    exchange_delay: Option<Duration>,
}

/// Offset space held in local memory.
///
/// Clones share one region, so a test can keep a handle for seeding and
/// scripting while the client owns another.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::with_region_size(DEFAULT_REGION_SIZE)
    }
}

impl MemoryTransport {
    /// Region of the default 64 KiB size with an `Any` simulator present.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region_size(size: usize) -> Self {
        MemoryTransport {
            inner: Arc::new(Mutex::new(MemoryState {
                data: vec![0; size],
                present: Some(SimTarget::Any),
                open: false,
                next_session: 1,
                scripted: VecDeque::new(),
                exchange_delay: None,
            })),
        }
    }

    /// Region with no simulator behind it; `open` returns the absent
    /// sentinel until one is installed with [`set_simulator`].
    ///
    /// [`set_simulator`]: MemoryTransport::set_simulator
    pub fn without_simulator() -> Self {
        let transport = Self::default();
        transport.lock().present = None;
        transport
    }

    /// Installs or removes the simulated target. `None` makes future
    /// opens return the sentinel and future exchanges fail with `NoSim`.
    pub fn set_simulator(&self, target: Option<SimTarget>) {
        self.lock().present = target;
    }

    /// Queues a result to be returned by the next exchange instead of
    /// touching the region. Scripted results are consumed in order.
    pub fn script_failure(&self, result: IpcResult) {
        self.lock().scripted.push_back(result);
    }

    /// Makes every exchange block for `delay` before completing, the way
    /// a slow IPC round trip would.
    pub fn set_exchange_delay(&self, delay: Option<Duration>) {
        self.lock().exchange_delay = delay;
    }

    /// Writes bytes directly into the region, bypassing the channel.
    pub fn seed(&self, offset: u32, bytes: &[u8]) {
        let mut state = self.lock();
        let start = offset as usize;
        if let Some(region) = state.data.get_mut(start..start + bytes.len()) {
            region.copy_from_slice(bytes);
        }
    }

    /// Reads bytes directly out of the region, bypassing the channel.
    pub fn inspect(&self, offset: u32, len: usize) -> Vec<u8> {
        let state = self.lock();
        let start = offset as usize;
        state.data.get(start..start + len).map(<[u8]>::to_vec).unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, target: SimTarget) -> Result<u32> {
        let mut state = self.lock();
        let matched = match state.present {
            None => false,
            Some(SimTarget::Any) => true,
            Some(present) => target == SimTarget::Any || target == present,
        };
        // A missing or mismatched simulator is the documented sentinel,
        // not an error.
        if !matched {
            debug!(%target, "no matching simulator behind the region");
            return Ok(0);
        }
        state.open = true;
        let session = state.next_session;
        state.next_session += 1;
        debug!(%target, session, "memory transport opened");
        Ok(session)
    }

    fn close(&mut self) {
        let mut state = self.lock();
        if state.open {
            debug!("memory transport closed");
        }
        state.open = false;
    }

    fn exchange(&mut self, batch: &[Request]) -> IpcResult {
        let delay = {
            let mut state = self.lock();
            if let Some(result) = state.scripted.pop_front() {
                return result;
            }
            if !state.open {
                return IpcResult::NotOpen;
            }
            if state.present.is_none() {
                return IpcResult::NoSim;
            }
            state.exchange_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        // Bounds-check the whole batch first so a bad request never
        // leaves the region partially written.
        for request in batch {
            let in_bounds = request.with_state(|s| {
                (s.offset as usize)
                    .checked_add(s.buffer.len())
                    .is_some_and(|end| end <= state.data.len())
            });
            if !in_bounds {
                return IpcResult::BadData;
            }
        }
        for request in batch {
            request.with_state(|s| {
                let start = s.offset as usize;
                let region = &mut state.data[start..start + s.buffer.len()];
                match s.direction {
                    Direction::Read => s.buffer.copy_from_slice(region),
                    Direction::Write => region.copy_from_slice(&s.buffer),
                }
            });
        }
        trace!(requests = batch.len(), "exchange complete");
        IpcResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Value, WireFormat};

    #[test]
    fn open_returns_sentinel_when_no_simulator_is_present() {
        let mut transport = MemoryTransport::without_simulator();
        assert_eq!(transport.open(SimTarget::Any).unwrap(), 0);

        transport.set_simulator(Some(SimTarget::Msfs));
        assert_ne!(transport.open(SimTarget::Msfs).unwrap(), 0);
    }

    #[test]
    fn open_against_wrong_target_returns_sentinel() {
        let mut transport = MemoryTransport::new();
        transport.set_simulator(Some(SimTarget::Fs2004));
        assert_eq!(transport.open(SimTarget::Msfs).unwrap(), 0);
        assert_ne!(transport.open(SimTarget::Any).unwrap(), 0);
    }

    #[test]
    fn exchange_requires_an_open_channel() {
        let mut transport = MemoryTransport::new();
        assert_eq!(transport.exchange(&[]), IpcResult::NotOpen);
    }

    #[test]
    fn reads_and_writes_move_through_the_region() {
        let mut transport = MemoryTransport::new();
        transport.open(SimTarget::Any).unwrap();
        transport.seed(0x02BC, &16_384u32.to_le_bytes());

        let read = Request::read(0x02BC, WireFormat::U32).unwrap();
        let write = Request::write(0x0BC8, WireFormat::U16, &Value::U16(0x4000)).unwrap();
        assert_eq!(transport.exchange(&[read.clone(), write]), IpcResult::Ok);

        assert_eq!(read.value().unwrap(), Value::U32(16_384));
        assert_eq!(transport.inspect(0x0BC8, 2), 0x4000u16.to_le_bytes().to_vec());
    }

    #[test]
    fn out_of_bounds_batch_leaves_region_untouched() {
        let mut transport = MemoryTransport::with_region_size(0x100);
        transport.open(SimTarget::Any).unwrap();

        let write = Request::write(0x0010, WireFormat::U32, &Value::U32(7)).unwrap();
        let beyond = Request::read(0x0200, WireFormat::U32).unwrap();
        assert_eq!(transport.exchange(&[write, beyond]), IpcResult::BadData);
        assert_eq!(transport.inspect(0x0010, 4), vec![0; 4]);
    }

    #[test]
    fn scripted_failures_are_consumed_in_order() {
        let mut transport = MemoryTransport::new();
        transport.open(SimTarget::Any).unwrap();
        transport.script_failure(IpcResult::Timeout);
        transport.script_failure(IpcResult::SendMessage);

        assert_eq!(transport.exchange(&[]), IpcResult::Timeout);
        assert_eq!(transport.exchange(&[]), IpcResult::SendMessage);
        assert_eq!(transport.exchange(&[]), IpcResult::Ok);
    }

    #[test]
    fn simulator_disappearing_mid_session_reports_no_sim() {
        let mut transport = MemoryTransport::new();
        transport.open(SimTarget::Any).unwrap();
        transport.set_simulator(None);
        assert_eq!(transport.exchange(&[]), IpcResult::NoSim);
    }
}
