//! Power-method vig removal.
//!
//! Finds the exponent k for which r1^(1/k) + r2^(1/k) = 1, where r1 and r2
//! are the implied probabilities. Newton iteration runs on x = 1/k, seeded
//! at k = 1. The residual is convex and decreasing in x, so iterates that
//! start left of the root never overshoot it; from the right (under-round
//! pairs) the first step can land left of the root, even below zero, and
//! the iteration then climbs back monotonically.

use tracing::debug;

use super::{implied, multiplicative, DevigError, FairPair};

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-12;

pub fn power(price_a: f64, price_b: f64) -> Result<FairPair, DevigError> {
    let r1 = implied(price_a)?;
    let r2 = implied(price_b)?;

    match solve_exponent(r1, r2) {
        Some(k) => Ok(FairPair::normalised(r1.powf(1.0 / k), r2.powf(1.0 / k))),
        None => {
            debug!(price_a, price_b, "Power solver did not converge, using multiplicative");
            multiplicative(price_a, price_b)
        }
    }
}

/// Solve for k. Returns `None` when the iteration fails to converge.
pub(crate) fn solve_exponent(r1: f64, r2: f64) -> Option<f64> {
    let (ln1, ln2) = (r1.ln(), r2.ln());
    let mut x = 1.0_f64;

    for _ in 0..MAX_ITERATIONS {
        let t1 = r1.powf(x);
        let t2 = r2.powf(x);
        let residual = t1 + t2 - 1.0;
        if residual.abs() < TOLERANCE {
            return (x > 0.0).then(|| 1.0 / x);
        }

        let slope = t1 * ln1 + t2 * ln2;
        if slope == 0.0 || !slope.is_finite() {
            return None;
        }
        x -= residual / slope;
        if !x.is_finite() {
            return None;
        }
    }
    None
}
