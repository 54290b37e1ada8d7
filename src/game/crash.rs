//! Crash Value Sampling
//!
//! Draws the hidden threshold a round will crash at. The distribution
//! is long-tailed: frequent low multipliers, rare very large ones, with
//! a jackpot-style floor at [`MIN_CRASH_VALUE`].

use rand::Rng;

use crate::game::clock::round_multiplier;

/// Lowest representable crash value.
pub const MIN_CRASH_VALUE: f64 = 1.01;

/// Probability that a round is forced short (crash below 1.2).
pub const LOW_ROUND_PROBABILITY: f64 = 0.07;

/// Upper bound (exclusive) for forced short rounds.
const LOW_ROUND_MAX: f64 = 1.2;

/// Draw a crash threshold for the next round.
///
/// Algorithm: `e = 100 / uniform_int(3, 100)`, `u = uniform(0, 1)`,
/// `raw = (e / (1 - u))^0.9`; with probability
/// [`LOW_ROUND_PROBABILITY`] the draw is overridden with a uniform
/// value in `[1.01, 1.2)`. The result is rounded to two decimals and
/// clamped to [`MIN_CRASH_VALUE`].
///
/// Pure apart from consuming `rng`; inject a seeded generator for
/// reproducible draws.
pub fn draw_crash_value<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let e = 100.0 / rng.gen_range(3..=100) as f64;
    let u: f64 = rng.gen();
    let mut raw = (e / (1.0 - u)).powf(0.9);

    if rng.gen::<f64>() < LOW_ROUND_PROBABILITY {
        raw = rng.gen_range(MIN_CRASH_VALUE..LOW_ROUND_MAX);
    }

    f64::max(MIN_CRASH_VALUE, round_multiplier(raw))
}
