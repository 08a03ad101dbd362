//! Typed access to a flight simulator's offset-addressed state.
//!
//! The simulator exposes its state as a flat memory region addressed by
//! offsets. This crate mediates between a host application and that
//! region: requests pair an offset with a binary layout and an optional
//! fixed-point transform, queues collect them, and a [`SimClient`]
//! exchanges whole batches atomically over an injected [`Transport`].
//!
//! Two processing styles are supported. One-shot: queue requests, call
//! [`SimClient::process_once`], read the buffers. Continual: register
//! requests once and let a cancellable periodic loop keep them fresh,
//! observing each tick through [`SimListener`] callbacks or the
//! [`SimClient::updates`] stream.
//!
//! ```
//! use std::time::Duration;
//!
//! use flightdeck::{
//!     MemoryTransport, Request, SimClient, SimTarget, WireFormat, transforms,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), flightdeck::LinkError> {
//! let client = SimClient::new(MemoryTransport::new());
//! client.connect(SimTarget::Any)?;
//!
//! let altitude =
//!     Request::read(0x0570, WireFormat::I64)?.with_transform(transforms::ALTITUDE_METERS);
//! client.add_continual_request(altitude.clone());
//! client.start_processing(Duration::from_millis(100), true)?;
//!
//! tokio::time::sleep(Duration::from_millis(250)).await;
//! println!("altitude: {:?} m", altitude.value()?);
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! Connection loss is detected on every exchange; the client flips to
//! `Disconnected`, stops the loop, and the caller re-arms with
//! [`SimClient::wait_for_connection`] once it wants back in.

mod client;
mod error;
mod listener;
mod queue;
mod scheduler;
mod transport;
mod types;

pub use client::{ConnectionState, ProcessingResult, SimClient};
pub use error::{LinkError, Result};
pub use listener::{FailReason, SimListener};
pub use queue::QueueSnapshot;
pub use scheduler::SchedulerState;
pub use transport::{IpcResult, MemoryTransport, SimTarget, Transport};
pub use types::{
    Direction, MAX_OFFSET, MIN_OFFSET, Request, Termination, TextEncoding, Transform, Value,
    WireFormat, transforms,
};
