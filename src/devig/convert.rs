//! Odds format conversions.

/// American odds to decimal. Returns `None` for values inside (-100, 100),
/// which are not valid American prices.
pub fn american_to_decimal(american: f64) -> Option<f64> {
    if american >= 100.0 {
        Some(american / 100.0 + 1.0)
    } else if american <= -100.0 {
        Some(100.0 / american.abs() + 1.0)
    } else {
        None
    }
}

/// Decimal odds to American. Prices at or below 1.0 have no American form.
pub fn decimal_to_american(decimal: f64) -> Option<f64> {
    if !decimal.is_finite() || decimal <= 1.0 {
        None
    } else if decimal >= 2.0 {
        Some((decimal - 1.0) * 100.0)
    } else {
        Some(-100.0 / (decimal - 1.0))
    }
}

pub fn implied_probability(decimal: f64) -> f64 {
    1.0 / decimal
}

/// Fair decimal price for a probability.
pub fn probability_to_decimal(probability: f64) -> Option<f64> {
    (probability > 0.0 && probability <= 1.0).then(|| 1.0 / probability)
}

/// Decimal odds as a reduced fractional string ("5/2"), rounded to hundredths.
pub fn decimal_to_fractional(decimal: f64) -> Option<String> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return None;
    }
    let numerator = ((decimal - 1.0) * 100.0).round() as u64;
    let denominator = 100_u64;
    let divisor = gcd(numerator, denominator);
    Some(format!("{}/{}", numerator / divisor, denominator / divisor))
}

/// Sum of the implied probabilities; > 1.0 means the book carries margin.
pub fn overround(prices: &[f64]) -> f64 {
    prices.iter().map(|p| implied_probability(*p)).sum()
}

/// Scale probabilities so they sum to 1.
pub fn normalize(probabilities: &[f64]) -> Vec<f64> {
    let total: f64 = probabilities.iter().sum();
    if total <= 0.0 {
        return probabilities.to_vec();
    }
    probabilities.iter().map(|p| p / total).collect()
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}
