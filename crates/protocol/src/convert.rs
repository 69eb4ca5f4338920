//! Conversions between the hub's native scale and the external entity scale.
//!
//! Native levels run 0-100, external brightness runs 0-255. Both directions
//! round half up, are total over their input domain, and round-trip within
//! one external unit.

use crate::constants::{COVER_OPEN_THRESHOLD, EXTERNAL_MAX, NATIVE_MAX};

/// Rejected scale inputs. Out-of-range values are never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScaleError {
    #[error("brightness {0} outside 0..=255")]
    Brightness(i64),

    #[error("position {0} outside 0..=100")]
    Position(i64),
}

/// Converts an external brightness (0-255) to a native level (0-100).
///
/// `round(brightness * 100 / 255)`.
pub fn external_to_native(brightness: i64) -> Result<u8, ScaleError> {
    if !(0..=i64::from(EXTERNAL_MAX)).contains(&brightness) {
        return Err(ScaleError::Brightness(brightness));
    }
    let max = i64::from(EXTERNAL_MAX);
    let native = (brightness * i64::from(NATIVE_MAX) + max / 2) / max;
    u8::try_from(native).map_err(|_| ScaleError::Brightness(brightness))
}

/// Converts a native level (0-100) to an external brightness (0-255).
///
/// `round(level * 255 / 100)`. Levels above 100 are treated as 100.
pub fn native_to_external(level: u8) -> u8 {
    let level = u32::from(level.min(NATIVE_MAX));
    let max = u32::from(NATIVE_MAX);
    let external = (level * u32::from(EXTERNAL_MAX) + max / 2) / max;
    u8::try_from(external).unwrap_or(EXTERNAL_MAX)
}

/// Validates a cover position on the native 0-100 scale.
pub fn validate_position(position: i64) -> Result<u8, ScaleError> {
    if !(0..=i64::from(NATIVE_MAX)).contains(&position) {
        return Err(ScaleError::Position(position));
    }
    u8::try_from(position).map_err(|_| ScaleError::Position(position))
}

/// Returns true if a cover at `position` counts as OPEN.
pub fn is_cover_open(position: u8) -> bool {
    position >= COVER_OPEN_THRESHOLD
}
