//! Beat/second conversion and fixed-precision rounding.
//!
//! Sequencer math is done in `f64` but every intermediate result is rounded to a
//! fixed decimal precision so error does not accumulate across thousands of ticks.

use tracing::warn;

/// Default rounding factor: three decimal places.
pub const DEFAULT_PRECISION: f64 = 1000.0;

/// Largest distance (in precision steps) a value may sit from the rounding grid.
const GRID_TOLERANCE: f64 = 1e-6;

#[inline]
pub fn round_to(value: f64, precision: f64) -> f64 {
    (value * precision).round() / precision
}

#[inline]
pub fn ceil_to(value: f64, precision: f64) -> f64 {
    // Scaled values within 1e-6 of a whole step are float noise, not a fraction.
    let scaled = (value * precision * 1e6).round() / 1e6;
    scaled.ceil() / precision
}

#[inline]
pub fn precise_add(a: f64, b: f64) -> f64 {
    round_to(a + b, DEFAULT_PRECISION)
}

#[inline]
pub fn precise_sub(a: f64, b: f64) -> f64 {
    round_to(a - b, DEFAULT_PRECISION)
}

#[inline]
fn precise_mul(a: f64, b: f64) -> f64 {
    round_to(a * b, DEFAULT_PRECISION)
}

#[inline]
fn precise_div(a: f64, b: f64) -> f64 {
    round_to(a / b, DEFAULT_PRECISION)
}

/// Seconds at `bpm` expressed in beats.
pub fn to_beats(seconds: f64, bpm: f64) -> f64 {
    precise_mul(seconds, precise_div(bpm, 60.0))
}

/// Beats at `bpm` expressed in seconds.
pub fn from_beats(beats: f64, bpm: f64) -> f64 {
    precise_mul(beats, precise_div(60.0, bpm))
}

/// Returns `false` and logs a warning when `value` is off the `1 / precision`
/// grid, e.g. once magnitudes grow past what an `f64` can place on it.
pub fn check_precision(context: &'static str, value: f64, precision: f64) -> bool {
    let scaled = value * precision;
    let tolerance = GRID_TOLERANCE.max(scaled.abs() * f64::EPSILON * 4.0);
    if !scaled.is_finite() || (scaled - scaled.round()).abs() > tolerance {
        warn!(context, value, "precision drift beyond the rounding window");
        return false;
    }
    true
}
