//! Payload value normalization
//!
//! Raw control values arrive with more resolution than most actions care
//! about. Rounding them to a fixed number of decimal places makes repeated
//! near-identical events collapse to the same payload, which is what lets a
//! lane coalesce them.

/// Default rounding precision for a bus
pub const DEFAULT_DECIMAL_PLACES: u32 = 2;

/// Highest precision that still rounds meaningfully in an `f64`
pub const MAX_DECIMAL_PLACES: u32 = 15;

/// Round an optional raw value to `decimal_places`
///
/// `None` passes through untouched.
pub fn normalize(raw: Option<f64>, decimal_places: u32) -> Option<f64> {
    raw.map(|value| round_to(value, decimal_places))
}

/// Round half away from zero at the given number of decimal places
pub fn round_to(value: f64, decimal_places: u32) -> f64 {
    let scale = 10f64.powi(decimal_places.min(MAX_DECIMAL_PLACES) as i32);
    (value * scale).round() / scale
}
