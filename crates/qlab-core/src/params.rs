use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named strategy parameters.
///
/// Ordered so two parameter sets compare by structural equality and
/// serialize in a stable key order.
pub type Params = BTreeMap<String, f64>;

/// Build a [`Params`] map from `(name, value)` pairs.
pub fn params<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Params {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Inclusive `{min, max, step}` grid for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Single-value range.
    pub fn fixed(value: f64) -> Self {
        Self::new(value, value, 1.0)
    }

    /// Number of grid values: `floor((max - min) / step) + 1`.
    ///
    /// Degenerate ranges (non-positive step, inverted or non-finite bounds)
    /// collapse to `min`.
    pub fn count(&self) -> usize {
        if !(self.step > 0.0) || !(self.max > self.min) || !self.step.is_finite() {
            return 1;
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return 1;
        }
        // Tolerate float noise such as (0.3 - 0.1) / 0.1 = 1.9999999999999998
        let mut steps = ((self.max - self.min) / self.step + 1e-9).floor();
        let noise = 16.0 * f64::EPSILON * self.max.abs().max(self.min.abs()).max(self.step);
        if self.min + steps * self.step > self.max + noise {
            steps -= 1.0;
        }
        (steps as usize).saturating_add(1)
    }

    /// The `k`-th grid value, rounded to 10 decimals.
    #[inline]
    pub fn value_at(&self, k: usize) -> f64 {
        round10(self.min + k as f64 * self.step)
    }

    /// All grid values in ascending order.
    pub fn values(&self) -> Vec<f64> {
        (0..self.count()).map(|k| self.value_at(k)).collect()
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min - 1e-9 && value <= self.max.max(self.min) + 1e-9
    }
}

/// Size of the Cartesian product of all ranges. Empty map → `Some(0)`,
/// `None` when the product does not fit in `usize`.
pub fn total_combinations(ranges: &BTreeMap<String, ParamRange>) -> Option<usize> {
    if ranges.is_empty() {
        return Some(0);
    }
    ranges
        .values()
        .try_fold(1usize, |acc, range| acc.checked_mul(range.count()))
}

#[inline]
fn round10(x: f64) -> f64 {
    (x * 1e10).round() / 1e10
}
