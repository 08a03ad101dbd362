//! Wire layout descriptors for offset request buffers.

use serde::{Deserialize, Serialize};

/// Character encoding used by the string layout.
///
/// The simulator side of the offset space predates Unicode; most textual
/// offsets are single-byte strings, so Latin-1 is offered alongside UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// Decode policy for string buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Termination {
    /// Decode the whole buffer, then trim NUL/whitespace padding from both
    /// ends.
    WholeBuffer,
    /// Return the prefix preceding the first zero byte.
    FirstNul,
}

/// Binary layout of one request buffer at its offset.
///
/// All multi-byte layouts are little-endian, matching the simulator's
/// offset space. `size()` is the fixed buffer length; only `Bytes` and
/// `Str` buffers may later be reallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireFormat {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// Raw byte block of a fixed length.
    Bytes { len: usize },
    /// Text of a fixed buffer length with an encoding and termination policy.
    Str { len: usize, encoding: TextEncoding, termination: Termination },
}

impl WireFormat {
    /// Returns the buffer size in bytes for this layout.
    pub const fn size(&self) -> usize {
        match self {
            WireFormat::U8 | WireFormat::I8 => 1,
            WireFormat::U16 | WireFormat::I16 => 2,
            WireFormat::U32 | WireFormat::I32 | WireFormat::F32 => 4,
            WireFormat::U64 | WireFormat::I64 | WireFormat::F64 => 8,
            WireFormat::Bytes { len } => *len,
            WireFormat::Str { len, .. } => *len,
        }
    }

    /// Whether this layout may be reallocated after construction.
    pub const fn is_variable_length(&self) -> bool {
        matches!(self, WireFormat::Bytes { .. } | WireFormat::Str { .. })
    }
}

impl TextEncoding {
    /// Encodes a string to bytes under this encoding.
    ///
    /// Latin-1 maps characters above U+00FF to `?`, the classic lossy
    /// single-byte fallback.
    pub(crate) fn encode(&self, value: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => value.as_bytes().to_vec(),
            TextEncoding::Latin1 => {
                value.chars().map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' }).collect()
            }
        }
    }

    /// Decodes bytes to a string under this encoding, lossily.
    pub(crate) fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}
