//! Round Clock
//!
//! Derives the client-visible multiplier from elapsed round time.
//! The growth function is deterministic; the engine samples it on a
//! short tick interval rather than continuously.

/// Multiplier growth per second of round time.
///
/// Chosen so an average round lasts tens of seconds before reaching
/// typical crash values.
pub const DEFAULT_GROWTH_RATE: f64 = 0.07;

/// Compute the multiplier after `elapsed_secs` of round time.
///
/// Linear growth from 1.0, rounded to two decimals. Monotonic
/// non-decreasing in `elapsed_secs` for any non-negative growth rate.
pub fn multiplier_at(elapsed_secs: f64, growth_rate: f64) -> f64 {
    round_multiplier(1.0 + growth_rate * elapsed_secs)
}

/// Round a raw multiplier to the two-decimal wire precision.
pub fn round_multiplier(raw: f64) -> f64 {
    (raw * 100.0).round() / 100.0
}
