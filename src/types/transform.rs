//! Fixed-point transforms between raw wire integers and engineering values.
//!
//! The simulator stores many quantities as scaled integers (an angle as a
//! 32-bit turn fraction, a speed as knots times 128, an altitude as a
//! 32.32 split). Instead of one request subclass per variable, a request
//! carries a [`Transform`] as plain data and the generic decode/encode
//! path applies it. The scale constants are externally documented
//! simulator conventions, preserved here in [`transforms`], not derived.
//!
//! Round trips through a non-identity transform are lossy by design:
//! forward and inverse pass through `f64`, so a 64-bit raw value is only
//! reproduced to within the 52-bit mantissa (about `2^(n-52)` raw LSBs
//! for an `n`-bit value). Linear transforms round, rather than truncate,
//! on the inverse path to keep that error centered.

use serde::{Deserialize, Serialize};

/// Transform between a raw integer wire value and an engineering value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    /// Value is used as stored.
    Identity,
    /// `value = raw * scale + offset`.
    Linear { scale: f64, offset: f64 },
    /// 64-bit split fixed point: high 32-bit word is the whole unit,
    /// low 32-bit word is the fraction as a 1/2^32 count.
    SplitFixedPoint,
}

impl Transform {
    /// Pure scaling transform with no offset.
    pub const fn scale(scale: f64) -> Self {
        Transform::Linear { scale, offset: 0.0 }
    }

    /// Forward transform: raw wire integer to engineering value.
    pub fn apply(&self, raw: i64) -> f64 {
        match self {
            Transform::Identity => raw as f64,
            Transform::Linear { scale, offset } => raw as f64 * scale + offset,
            Transform::SplitFixedPoint => {
                let unit = (raw >> 32) as f64;
                let fraction = (raw as u64 & 0xFFFF_FFFF) as f64 / 4_294_967_296.0;
                unit + fraction
            }
        }
    }

    /// Inverse transform: engineering value back to a raw wire integer.
    pub fn invert(&self, value: f64) -> i64 {
        match self {
            Transform::Identity => value as i64,
            Transform::Linear { scale, offset } => ((value - offset) / scale).round() as i64,
            Transform::SplitFixedPoint => {
                let unit = value.floor();
                let fraction = value - unit;
                ((unit as i64) << 32) | ((fraction * 4_294_967_296.0).round() as i64 & 0xFFFF_FFFF)
            }
        }
    }

    /// Whether this is the identity transform.
    pub const fn is_identity(&self) -> bool {
        matches!(self, Transform::Identity)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::Identity
    }
}

/// Documented simulator fixed-point conventions, preserved as data.
///
/// Offsets in the comments refer to the simulator's published offset
/// tables and are informative only; this module carries no offsets.
pub mod transforms {
    use super::Transform;

    /// Angle stored as a signed 32-bit turn fraction: `raw * 360 / 2^32`.
    /// Used by pitch, bank and heading offsets (0x0578, 0x057C, 0x0580).
    pub const DEGREES_FROM_U32: Transform =
        Transform::Linear { scale: 360.0 / (65_536.0 * 65_536.0), offset: 0.0 };

    /// Angle stored as a signed 64-bit turn fraction: `raw * 360 / 2^64`.
    /// Used by longitude (0x0568).
    pub const DEGREES_FROM_U64: Transform = Transform::Linear {
        scale: 360.0 / (65_536.0 * 65_536.0 * 65_536.0 * 65_536.0),
        offset: 0.0,
    };

    /// Latitude in degrees: `raw * 90 / (10001750 * 2^32)` (0x0560).
    pub const LATITUDE_DEGREES: Transform =
        Transform::Linear { scale: 90.0 / (10_001_750.0 * 65_536.0 * 65_536.0), offset: 0.0 };

    /// Airspeed in knots stored as `knots * 128` (0x02B8, 0x02BC).
    pub const KNOTS_128: Transform = Transform::Linear { scale: 1.0 / 128.0, offset: 0.0 };

    /// Vertical speed in metres per second stored as `m/s * 256` (0x02C8).
    pub const METERS_PER_SEC_256: Transform =
        Transform::Linear { scale: 1.0 / 256.0, offset: 0.0 };

    /// Altitude in metres as a 32.32 split fixed point (0x0570).
    pub const ALTITUDE_METERS: Transform = Transform::SplitFixedPoint;
}
