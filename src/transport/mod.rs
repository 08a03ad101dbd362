//! The transport seam between the client and a simulator process.
//!
//! A [`Transport`] owns one IPC channel into an offset-addressed memory
//! region and performs atomic batch exchanges over it. The client never
//! touches offsets directly; everything flows through this trait, so an
//! in-process [`MemoryTransport`] can stand in for the real channel on
//! any platform.

mod memory;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Request;

pub use memory::MemoryTransport;

/// Outcome of one IPC call, the channel's fixed result table.
///
/// These are protocol codes, not crate errors: a non-`Ok` exchange is
/// reported through processing results and `on_fail`, and only wrapped
/// in an error by operations that cannot proceed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpcResult {
    Ok,
    /// Attempt to open an already open channel.
    AlreadyOpen,
    /// The simulator process could not be found.
    NoSim,
    /// Failed to register the common window message.
    RegisterMessage,
    /// Failed to create the atom for the mapping filename.
    Atom,
    /// Failed to create the file mapping object.
    Map,
    /// Failed to open a view of the file map.
    View,
    /// Channel endpoint has an incompatible version.
    Version,
    /// A simulator is running, but not the requested one.
    WrongSim,
    /// Call cannot execute, the channel is not open.
    NotOpen,
    /// No requests were accumulated for the call.
    NoData,
    /// The exchange timed out all retries.
    Timeout,
    /// Delivering the exchange message failed all retries.
    SendMessage,
    /// The exchange carried malformed data.
    BadData,
    /// Endpoint reachable but the simulator is not running behind it.
    NotRunning,
    /// The accumulation area for one exchange is full.
    BufferFull,
}

impl IpcResult {
    /// Human-readable description from the channel's documented table.
    pub const fn message(&self) -> &'static str {
        match self {
            IpcResult::Ok => "Okay",
            IpcResult::AlreadyOpen => "Attempt to Open when already Open",
            IpcResult::NoSim => "Cannot connect to the simulator IPC endpoint",
            IpcResult::RegisterMessage => "Failed to register common message with Windows",
            IpcResult::Atom => "Failed to create atom for mapping filename",
            IpcResult::Map => "Failed to create a file mapping object",
            IpcResult::View => "Failed to open a view to the file map",
            IpcResult::Version => "Incorrect version of the IPC endpoint",
            IpcResult::WrongSim => "Simulator is not the version requested",
            IpcResult::NotOpen => "Call cannot execute, link not open",
            IpcResult::NoData => "Call cannot execute, no requests accumulated",
            IpcResult::Timeout => "IPC timed out all retries",
            IpcResult::SendMessage => "IPC send message failed all retries",
            IpcResult::BadData => "IPC request contains bad data",
            IpcResult::NotRunning => "IPC endpoint reachable but the simulator is not running",
            IpcResult::BufferFull => "Request cannot be added, process memory is full",
        }
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self, IpcResult::Ok)
    }

    /// Results that mean the connection itself is gone, so the client
    /// must transition to disconnected.
    pub const fn is_connection_loss(&self) -> bool {
        matches!(self, IpcResult::NoSim | IpcResult::NotOpen | IpcResult::SendMessage)
    }
}

impl std::fmt::Display for IpcResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Which simulator flavor a connection attempt should accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SimTarget {
    /// Accept whichever simulator answers.
    #[default]
    Any,
    Fs98,
    Fs2000,
    Cfs2,
    Cfs1,
    Fly,
    Fs2002,
    Fs2004,
    FsX,
    Esp,
    Prepar3D,
    FsX64,
    Prepar3D64,
    Msfs,
}

impl std::fmt::Display for SimTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SimTarget::Any => "Any",
            SimTarget::Fs98 => "FS98",
            SimTarget::Fs2000 => "FS2000",
            SimTarget::Cfs2 => "CFS2",
            SimTarget::Cfs1 => "CFS1",
            SimTarget::Fly => "Fly!",
            SimTarget::Fs2002 => "FS2002",
            SimTarget::Fs2004 => "FS2004",
            SimTarget::FsX => "FSX",
            SimTarget::Esp => "ESP",
            SimTarget::Prepar3D => "Prepar3D",
            SimTarget::FsX64 => "FSX with 64-bit IPC",
            SimTarget::Prepar3D64 => "Prepar3D with 64-bit IPC",
            SimTarget::Msfs => "MSFS",
        };
        f.write_str(name)
    }
}

/// One IPC channel into a simulator's offset space.
///
/// Calls are synchronous; the client wraps them in its own async
/// machinery. Implementations are free to block briefly, the way the
/// real channel blocks on its message round trip.
pub trait Transport: Send {
    /// Attempts to open the channel against `target`.
    ///
    /// `Ok(0)` is the documented sentinel for "no such simulator right
    /// now"; it is an unsuccessful attempt but not an error. Any nonzero
    /// value identifies the connected simulator session. `Err` is
    /// reserved for protocol-level failures outside the result table.
    fn open(&mut self, target: SimTarget) -> Result<u32>;

    /// Closes the channel. Must be idempotent.
    fn close(&mut self);

    /// One atomic round trip over the ordered batch.
    ///
    /// Read requests are filled from the offset space and write requests
    /// applied to it, each buffer mutated in place through its handle.
    fn exchange(&mut self, batch: &[Request]) -> IpcResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_results_match_documented_set() {
        assert!(IpcResult::NoSim.is_connection_loss());
        assert!(IpcResult::NotOpen.is_connection_loss());
        assert!(IpcResult::SendMessage.is_connection_loss());

        assert!(!IpcResult::Ok.is_connection_loss());
        assert!(!IpcResult::Timeout.is_connection_loss());
        assert!(!IpcResult::BadData.is_connection_loss());
        assert!(!IpcResult::BufferFull.is_connection_loss());
    }

    #[test]
    fn every_result_has_a_message() {
        let all = [
            IpcResult::Ok,
            IpcResult::AlreadyOpen,
            IpcResult::NoSim,
            IpcResult::RegisterMessage,
            IpcResult::Atom,
            IpcResult::Map,
            IpcResult::View,
            IpcResult::Version,
            IpcResult::WrongSim,
            IpcResult::NotOpen,
            IpcResult::NoData,
            IpcResult::Timeout,
            IpcResult::SendMessage,
            IpcResult::BadData,
            IpcResult::NotRunning,
            IpcResult::BufferFull,
        ];
        for result in all {
            assert!(!result.message().is_empty());
            assert_eq!(result.to_string(), result.message());
        }
    }

    #[test]
    fn sim_target_defaults_to_any() {
        assert_eq!(SimTarget::default(), SimTarget::Any);
        assert_eq!(SimTarget::Msfs.to_string(), "MSFS");
    }
}
