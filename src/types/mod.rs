//! Core data types for the offset request model.
//!
//! A request pairs an offset in the simulator's flat address space with
//! a little-endian buffer layout ([`WireFormat`]), an optional
//! fixed-point [`Transform`], and a direction. Values cross the API as
//! the dynamically typed [`Value`].

mod format;
mod request;
mod transform;
mod value;

pub use format::{Termination, TextEncoding, WireFormat};
pub use request::{Direction, MAX_OFFSET, MIN_OFFSET, Request};
pub use transform::{Transform, transforms};
pub use value::Value;
