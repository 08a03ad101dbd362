//! Offset requests: an address, a buffer and a codec.
//!
//! A [`Request`] is a cheaply cloneable handle over shared state. The
//! caller keeps one clone and hands another to a queue; when a transport
//! exchange fills the buffer in place, the caller's handle sees the new
//! bytes. Each handle serializes access through its own mutex, so a
//! background tick writing a buffer never races a caller decoding it.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::types::format::{Termination, TextEncoding, WireFormat};
use crate::types::transform::Transform;
use crate::types::value::Value;

/// Lowest addressable offset.
pub const MIN_OFFSET: u32 = 0x0000;
/// Highest addressable offset.
pub const MAX_OFFSET: u32 = 0x7FFF_FFFF;

/// Whether a request reads from or writes to the offset space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug)]
pub(crate) struct RequestState {
    pub(crate) offset: u32,
    pub(crate) direction: Direction,
    pub(crate) format: WireFormat,
    pub(crate) transform: Transform,
    pub(crate) buffer: Vec<u8>,
}

/// A single typed read or write against one offset.
#[derive(Debug, Clone)]
pub struct Request {
    inner: Arc<Mutex<RequestState>>,
}

impl Request {
    /// Builds a read request; the buffer is zeroed at the format's size
    /// and filled by the next exchange.
    pub fn read(offset: u32, format: WireFormat) -> Result<Self> {
        Self::new(offset, Direction::Read, format, Transform::Identity, vec![0; format.size()])
    }

    /// Builds a write request with the buffer encoded from `value`.
    pub fn write(offset: u32, format: WireFormat, value: &Value) -> Result<Self> {
        let buffer = encode(format, Transform::Identity, value)?;
        Self::new(offset, Direction::Write, format, Transform::Identity, buffer)
    }

    /// Builds a write request for a string whose buffer length is the
    /// encoded text plus a trailing NUL. For a bounded write, use
    /// [`Request::write`] with an explicit `Str { len, .. }` format;
    /// output is then truncated to `len - 1` and the final byte forced
    /// to zero.
    pub fn write_string(offset: u32, value: &str, encoding: TextEncoding) -> Result<Self> {
        let len = encoding.encode(value).len() + 1;
        let format = WireFormat::Str { len, encoding, termination: Termination::FirstNul };
        Self::write(offset, format, &Value::Str(value.to_owned()))
    }

    /// Attaches a fixed-point transform; decode applies it forward,
    /// encode applies its inverse. Only meaningful on integer formats.
    pub fn with_transform(self, transform: Transform) -> Self {
        self.lock().transform = transform;
        self
    }

    fn new(
        offset: u32,
        direction: Direction,
        format: WireFormat,
        transform: Transform,
        buffer: Vec<u8>,
    ) -> Result<Self> {
        if offset > MAX_OFFSET {
            return Err(LinkError::OffsetOutOfRange { offset });
        }
        if buffer.is_empty() {
            return Err(LinkError::InvalidSize { size: 0 });
        }
        Ok(Request {
            inner: Arc::new(Mutex::new(RequestState {
                offset,
                direction,
                format,
                transform,
                buffer,
            })),
        })
    }

    /// Decodes the current buffer under the request's codec.
    pub fn value(&self) -> Result<Value> {
        let state = self.lock();
        decode(state.format, state.transform, &state.buffer)
    }

    /// Re-encodes the buffer from `value` under the request's codec.
    ///
    /// The buffer length is unchanged; numeric values wider than the
    /// layout are width-truncated on the wire.
    pub fn set_value(&self, value: &Value) -> Result<()> {
        let mut state = self.lock();
        state.buffer = encode(state.format, state.transform, value)?;
        Ok(())
    }

    /// Resizes a variable-length buffer, zero-filling any growth.
    ///
    /// Fixed-width formats cannot be resized.
    pub fn reallocate(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(LinkError::InvalidSize { size: 0 });
        }
        let mut state = self.lock();
        match state.format {
            WireFormat::Bytes { .. } => {
                state.format = WireFormat::Bytes { len };
            }
            WireFormat::Str { encoding, termination, .. } => {
                state.format = WireFormat::Str { len, encoding, termination };
            }
            other => {
                return Err(LinkError::buffer_resize(format!(
                    "{other:?} is a fixed-width layout"
                )));
            }
        }
        state.buffer.resize(len, 0);
        Ok(())
    }

    pub fn offset(&self) -> u32 {
        self.lock().offset
    }

    pub fn direction(&self) -> Direction {
        self.lock().direction
    }

    pub fn format(&self) -> WireFormat {
        self.lock().format
    }

    /// Current buffer length in bytes.
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current buffer contents.
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().buffer.clone()
    }

    /// Whether two handles refer to the same underlying request.
    pub fn same_handle(&self, other: &Request) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `f` over the locked state; the transport uses this to fill
    /// or drain buffers in place during an exchange.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut RequestState) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RequestState> {
        // A poisoned buffer mutex only means a listener panicked while
        // holding it; the bytes are still valid.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode(format: WireFormat, transform: Transform, buffer: &[u8]) -> Result<Value> {
    let numeric = |raw: i64, untransformed: Value| -> Value {
        if transform.is_identity() { untransformed } else { Value::F64(transform.apply(raw)) }
    };

    match format {
        WireFormat::U8 => {
            let [raw] = slice(buffer, 1)?;
            Ok(numeric(i64::from(raw), Value::U8(raw)))
        }
        WireFormat::I8 => {
            let [raw] = slice(buffer, 1)?;
            let raw = raw as i8;
            Ok(numeric(i64::from(raw), Value::I8(raw)))
        }
        WireFormat::U16 => {
            let raw = u16::from_le_bytes(slice(buffer, 2)?);
            Ok(numeric(i64::from(raw), Value::U16(raw)))
        }
        WireFormat::I16 => {
            let raw = i16::from_le_bytes(slice(buffer, 2)?);
            Ok(numeric(i64::from(raw), Value::I16(raw)))
        }
        WireFormat::U32 => {
            let raw = u32::from_le_bytes(slice(buffer, 4)?);
            Ok(numeric(i64::from(raw), Value::U32(raw)))
        }
        WireFormat::I32 => {
            let raw = i32::from_le_bytes(slice(buffer, 4)?);
            Ok(numeric(i64::from(raw), Value::I32(raw)))
        }
        WireFormat::U64 => {
            let raw = u64::from_le_bytes(slice(buffer, 8)?);
            Ok(numeric(raw as i64, Value::U64(raw)))
        }
        WireFormat::I64 => {
            let raw = i64::from_le_bytes(slice(buffer, 8)?);
            Ok(numeric(raw, Value::I64(raw)))
        }
        WireFormat::F32 => {
            require_identity(transform, format)?;
            Ok(Value::F32(f32::from_le_bytes(slice(buffer, 4)?)))
        }
        WireFormat::F64 => {
            require_identity(transform, format)?;
            Ok(Value::F64(f64::from_le_bytes(slice(buffer, 8)?)))
        }
        WireFormat::Bytes { .. } => Ok(Value::Bytes(buffer.to_vec())),
        WireFormat::Str { encoding, termination, .. } => {
            let text = match termination {
                Termination::FirstNul => {
                    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
                    encoding.decode(&buffer[..end])
                }
                Termination::WholeBuffer => encoding
                    .decode(buffer)
                    .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_owned(),
            };
            Ok(Value::Str(text))
        }
    }
}

fn encode(format: WireFormat, transform: Transform, value: &Value) -> Result<Vec<u8>> {
    let raw_int = |value: &Value| -> Result<i64> {
        if transform.is_identity() {
            value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .ok_or_else(|| LinkError::type_conversion(format!("{value:?} is not numeric")))
        } else {
            let v = value
                .as_f64()
                .ok_or_else(|| LinkError::type_conversion(format!("{value:?} is not numeric")))?;
            Ok(transform.invert(v))
        }
    };

    match format {
        WireFormat::U8 => Ok(vec![raw_int(value)? as u8]),
        WireFormat::I8 => Ok(vec![raw_int(value)? as i8 as u8]),
        WireFormat::U16 => Ok((raw_int(value)? as u16).to_le_bytes().to_vec()),
        WireFormat::I16 => Ok((raw_int(value)? as i16).to_le_bytes().to_vec()),
        WireFormat::U32 => Ok((raw_int(value)? as u32).to_le_bytes().to_vec()),
        WireFormat::I32 => Ok((raw_int(value)? as i32).to_le_bytes().to_vec()),
        WireFormat::U64 => Ok((raw_int(value)? as u64).to_le_bytes().to_vec()),
        WireFormat::I64 => Ok(raw_int(value)?.to_le_bytes().to_vec()),
        WireFormat::F32 => {
            require_identity(transform, format)?;
            let v = value
                .as_f64()
                .ok_or_else(|| LinkError::type_conversion(format!("{value:?} is not numeric")))?;
            Ok((v as f32).to_le_bytes().to_vec())
        }
        WireFormat::F64 => {
            require_identity(transform, format)?;
            let v = value
                .as_f64()
                .ok_or_else(|| LinkError::type_conversion(format!("{value:?} is not numeric")))?;
            Ok(v.to_le_bytes().to_vec())
        }
        WireFormat::Bytes { len } => {
            let src = value
                .as_bytes()
                .ok_or_else(|| LinkError::type_conversion("expected a byte value"))?;
            let mut out = vec![0u8; len];
            let n = src.len().min(len);
            out[..n].copy_from_slice(&src[..n]);
            Ok(out)
        }
        WireFormat::Str { len, encoding, .. } => {
            let src = value
                .as_str()
                .ok_or_else(|| LinkError::type_conversion("expected a string value"))?;
            let encoded = encoding.encode(src);
            // Room for the terminator: at most len - 1 text bytes, last
            // byte always zero.
            let mut out = vec![0u8; len];
            let n = encoded.len().min(len.saturating_sub(1));
            out[..n].copy_from_slice(&encoded[..n]);
            Ok(out)
        }
    }
}

fn require_identity(transform: Transform, format: WireFormat) -> Result<()> {
    if transform.is_identity() {
        Ok(())
    } else {
        Err(LinkError::type_conversion(format!(
            "fixed-point transform is not applicable to {format:?}"
        )))
    }
}

fn slice<const N: usize>(buffer: &[u8], n: usize) -> Result<[u8; N]> {
    buffer
        .get(..n)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| LinkError::type_conversion(format!("buffer shorter than {n} bytes")))
}
