//! Vig removal.
//!
//! Turns one bookmaker's two complementary decimal prices into a fair
//! probability pair that sums to 1. The strategies form a closed set chosen
//! by configuration (`run.devig_method`). All of them are pure functions.

pub mod convert;
mod power;

pub use power::power;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Clamp bound for strategies that can push a probability outside (0, 1).
const PROBABILITY_FLOOR: f64 = 1e-9;

/// A fair probability pair for (primary side, complement side).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairPair {
    pub first: f64,
    pub second: f64,
}

impl FairPair {
    pub fn sum(&self) -> f64 {
        self.first + self.second
    }

    /// Element-wise mean. Returns `None` for an empty slice.
    pub fn mean(pairs: &[FairPair]) -> Option<FairPair> {
        if pairs.is_empty() {
            return None;
        }
        let n = pairs.len() as f64;
        let (first, second) = pairs
            .iter()
            .fold((0.0, 0.0), |(a, b), p| (a + p.first, b + p.second));
        Some(FairPair {
            first: first / n,
            second: second / n,
        })
    }

    fn normalised(first: f64, second: f64) -> FairPair {
        let total = first + second;
        FairPair {
            first: first / total,
            second: second / total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DevigError {
    #[error("Invalid decimal price {0}: must be finite and greater than 1")]
    InvalidPrice(f64),
}

/// Configured vig-removal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevigMethod {
    Multiplicative,
    Additive,
    #[default]
    Power,
}

impl DevigMethod {
    pub fn devig(self, price_a: f64, price_b: f64) -> Result<FairPair, DevigError> {
        match self {
            DevigMethod::Multiplicative => multiplicative(price_a, price_b),
            DevigMethod::Additive => additive(price_a, price_b),
            DevigMethod::Power => power(price_a, price_b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DevigMethod::Multiplicative => "multiplicative",
            DevigMethod::Additive => "additive",
            DevigMethod::Power => "power",
        }
    }
}

impl fmt::Display for DevigMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DevigMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "multiplicative" => Ok(DevigMethod::Multiplicative),
            "additive" => Ok(DevigMethod::Additive),
            "power" => Ok(DevigMethod::Power),
            other => Err(format!("Unknown devig method: {other}")),
        }
    }
}

/// Implied probability of a decimal price, rejecting anything that is not a
/// valid price (> 1, finite).
pub(crate) fn implied(price: f64) -> Result<f64, DevigError> {
    if !price.is_finite() || price <= 1.0 {
        return Err(DevigError::InvalidPrice(price));
    }
    Ok(1.0 / price)
}

/// Scale both implied probabilities by their sum.
pub fn multiplicative(price_a: f64, price_b: f64) -> Result<FairPair, DevigError> {
    let r1 = implied(price_a)?;
    let r2 = implied(price_b)?;
    Ok(FairPair::normalised(r1, r2))
}

/// Subtract half the overround from each side.
pub fn additive(price_a: f64, price_b: f64) -> Result<FairPair, DevigError> {
    let r1 = implied(price_a)?;
    let r2 = implied(price_b)?;
    let margin = (r1 + r2 - 1.0) / 2.0;
    let p1 = (r1 - margin).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
    let p2 = (r2 - margin).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
    Ok(FairPair::normalised(p1, p2))
}
